//! Evidence items: uploaded artifacts and what was extracted from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Actor, Error, Result, blob::ArtifactHandle};

// ─── Enumerations ────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MediaKind {
  Document,
  Image,
  Audio,
  Video,
  Text,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExtractionStatus {
  Pending,
  Processing,
  Extracted,
  Failed,
}

impl ExtractionStatus {
  /// Allowed moves: pending → processing → extracted | failed, and the
  /// explicit re-submission failed → pending.
  pub fn can_transition_to(self, next: Self) -> bool {
    matches!(
      (self, next),
      (Self::Pending, Self::Processing)
        | (Self::Processing, Self::Extracted)
        | (Self::Processing, Self::Failed)
        | (Self::Failed, Self::Pending)
    )
  }
}

/// Why an extraction failed.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureCause {
  Timeout,
  UnsupportedFormat,
  ExternalServiceError,
  ContentTooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionFailure {
  pub cause:  FailureCause,
  pub detail: String,
}

// ─── Extracted content ───────────────────────────────────────────────────────

/// A structured piece of extracted content that keeps its position in the
/// source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
  Page {
    number: u32,
    text:   String,
  },
  Utterance {
    start_ms: u64,
    end_ms:   Option<u64>,
    text:     String,
  },
  Keyframe {
    at_ms: u64,
    text:  String,
  },
}

/// The canonical form of an extraction: flat text for matching and scoring,
/// plus whatever structure the extractor could preserve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
  pub text:     String,
  #[serde(default)]
  pub segments: Vec<Segment>,
}

// ─── Evidence item ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
  pub evidence_id:  Uuid,
  pub audit_id:     Uuid,
  pub artifact:     ArtifactHandle,
  pub filename:     Option<String>,
  /// SHA-256 hex digest of the raw bytes.
  pub content_hash: String,
  pub size_bytes:   u64,
  pub media_kind:   MediaKind,
  pub status:       ExtractionStatus,
  pub content:      Option<ExtractedContent>,
  pub failure:      Option<ExtractionFailure>,
  pub uploaded_by:  Actor,
  pub uploaded_at:  DateTime<Utc>,
  pub processed_at: Option<DateTime<Utc>>,
}

impl EvidenceItem {
  /// Extracted text, if extraction has succeeded.
  pub fn text(&self) -> Option<&str> {
    match (self.status, &self.content) {
      (ExtractionStatus::Extracted, Some(c)) => Some(c.text.as_str()),
      _ => None,
    }
  }

  fn transition(&mut self, next: ExtractionStatus) -> Result<()> {
    if !self.status.can_transition_to(next) {
      return Err(Error::Conflict(format!(
        "evidence {} cannot move from {} to {next}",
        self.evidence_id, self.status
      )));
    }
    self.status = next;
    Ok(())
  }

  pub fn begin_processing(&mut self) -> Result<()> {
    self.transition(ExtractionStatus::Processing)
  }

  pub fn mark_extracted(
    &mut self,
    content: ExtractedContent,
    at: DateTime<Utc>,
  ) -> Result<()> {
    self.transition(ExtractionStatus::Extracted)?;
    self.content = Some(content);
    self.failure = None;
    self.processed_at = Some(at);
    Ok(())
  }

  pub fn mark_failed(
    &mut self,
    failure: ExtractionFailure,
    at: DateTime<Utc>,
  ) -> Result<()> {
    self.transition(ExtractionStatus::Failed)?;
    self.content = None;
    self.failure = Some(failure);
    self.processed_at = Some(at);
    Ok(())
  }

  /// Put a failed item back in the queue. Only an explicit caller request
  /// does this; the engine never retries on its own.
  pub fn reset_for_resubmission(&mut self) -> Result<()> {
    self.transition(ExtractionStatus::Pending)?;
    self.failure = None;
    self.processed_at = None;
    Ok(())
  }
}

/// Input to [`crate::store::AuditStore::add_evidence`]. The store assigns the
/// id, the `pending` status and the upload timestamp.
#[derive(Debug, Clone)]
pub struct NewEvidence {
  pub audit_id:     Uuid,
  pub artifact:     ArtifactHandle,
  pub filename:     Option<String>,
  pub content_hash: String,
  pub size_bytes:   u64,
  pub media_kind:   MediaKind,
  pub uploaded_by:  Actor,
}
