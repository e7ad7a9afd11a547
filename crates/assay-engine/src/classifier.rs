//! The evidence classifier: upload, sniff, extract.
//!
//! Each upload in a batch is handled independently. An upload either ends up
//! as a stored [`EvidenceItem`] (whose status records whether extraction
//! worked) or is rejected outright without touching storage.

use std::collections::HashSet;

use assay_core::{
  Actor, Error, Result,
  analysis::{AnalysisError, AnalysisService, RawExtraction},
  audit::Audit,
  blob::{ArtifactHandle, BlobStore},
  evidence::{
    EvidenceItem, ExtractedContent, ExtractionFailure, ExtractionStatus, FailureCause,
    MediaKind, NewEvidence,
  },
  store::{AuditStore, LinkQuery},
};
use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
  Engine,
  extract::{KindProblem, fuse_video, normalise, resolve_kind, untimed_transcript},
};

/// One file offered for upload.
#[derive(Debug, Clone)]
pub struct Upload {
  pub filename:      Option<String>,
  /// What the uploader says the file is. When absent the content signature
  /// decides.
  pub declared_kind: Option<MediaKind>,
  pub bytes:         Bytes,
}

/// Per-upload result of [`Engine::upload_batch`].
#[derive(Debug)]
pub enum UploadOutcome {
  /// Stored; the item's status says whether extraction succeeded.
  Stored(EvidenceItem),
  /// Nothing was stored, or the item was deleted before its extraction
  /// finished.
  Rejected {
    filename: Option<String>,
    error:    Error,
  },
}

impl UploadOutcome {
  pub fn item(&self) -> Option<&EvidenceItem> {
    match self {
      Self::Stored(item) => Some(item),
      Self::Rejected { .. } => None,
    }
  }
}

/// SHA-256 of the raw bytes, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String { hex::encode(Sha256::digest(bytes)) }

fn failure(cause: FailureCause, detail: impl Into<String>) -> ExtractionFailure {
  ExtractionFailure {
    cause,
    detail: detail.into(),
  }
}

fn analysis_failure(e: AnalysisError) -> ExtractionFailure {
  failure(e.cause(), e.to_string())
}

/// Accepts evidence for `audit` or says why not.
fn ensure_accepts_evidence(audit: &Audit) -> Result<()> {
  audit.ensure_unlocked()?;
  if !audit.state.accepts_evidence() {
    return Err(Error::Conflict(format!(
      "audit {} is {}; evidence is accepted during evidence collection and scoring",
      audit.audit_id, audit.state
    )));
  }
  Ok(())
}

/// An upload that passed admission. Its row exists and is `processing`.
struct Admitted {
  item:     EvidenceItem,
  bytes:    Bytes,
  mismatch: Option<KindProblem>,
}

impl<S, B, A> Engine<S, B, A>
where
  S: AuditStore,
  B: BlobStore,
  A: AnalysisService,
{
  /// Store and extract a batch of uploads.
  ///
  /// A failure of one upload never affects the others. Identical bytes
  /// uploaded twice to the same audit are rejected with a conflict.
  ///
  /// The audit lock is held while uploads are checked and their rows
  /// inserted, and again while results are written. Extraction itself runs
  /// unlocked, so other mutations of the audit proceed meanwhile.
  #[instrument(skip(self, uploads), fields(count = uploads.len()))]
  pub async fn upload_batch(
    &self,
    audit_id: Uuid,
    uploads: Vec<Upload>,
    actor: &Actor,
  ) -> Result<Vec<UploadOutcome>> {
    let admitted = {
      let _guard = self.locks.lock(audit_id).await;
      let audit = self.load_audit(audit_id).await?;
      ensure_accepts_evidence(&audit)?;

      let mut seen = HashSet::new();
      let mut admitted = Vec::with_capacity(uploads.len());
      for upload in uploads {
        let hash = content_hash(&upload.bytes);
        let filename = upload.filename.clone();
        let result = if seen.insert(hash.clone()) {
          self.admit(audit_id, upload, hash, actor).await
        } else {
          Err(Error::Conflict("the same content appears twice in this batch".into()))
        };
        admitted.push(result.map_err(|error| (filename, error)));
      }
      admitted
    };

    let extracted = join_all(admitted.into_iter().map(|admitted| async move {
      let admitted = admitted?;
      let outcome = match admitted.mismatch {
        Some(problem) => Err(failure(FailureCause::UnsupportedFormat, problem.describe())),
        None => self.extract(&admitted.item, admitted.bytes).await,
      };
      Ok::<_, (Option<String>, Error)>((admitted.item, outcome))
    }))
    .await;

    let _guard = self.locks.lock(audit_id).await;
    self.note_if_locked(audit_id).await?;
    let mut outcomes = Vec::with_capacity(extracted.len());
    for result in extracted {
      let result = match result {
        Ok((item, outcome)) => {
          let filename = item.filename.clone();
          self
            .finish(item, outcome)
            .await
            .map_err(|error| (filename, error))
        }
        Err(rejected) => Err(rejected),
      };
      outcomes.push(match result {
        Ok(item) => UploadOutcome::Stored(item),
        Err((filename, error)) => {
          warn!(%audit_id, ?filename, %error, "upload rejected");
          UploadOutcome::Rejected { filename, error }
        }
      });
    }

    let stored = outcomes.iter().filter(|o| o.item().is_some()).count();
    info!(%audit_id, %actor, stored, total = outcomes.len(), "upload batch processed");
    Ok(outcomes)
  }

  /// Check one upload, store its bytes and insert its row as `processing`.
  /// Runs under the audit lock so the duplicate check and the insert are
  /// not interleaved with another upload.
  async fn admit(
    &self,
    audit_id: Uuid,
    upload: Upload,
    hash: String,
    actor: &Actor,
  ) -> Result<Admitted> {
    let duplicates = self
      .store
      .find_evidence_by_hash(hash.clone(), Some(audit_id))
      .await
      .map_err(Error::store)?;
    if let Some(existing) = duplicates.first() {
      return Err(Error::Conflict(format!(
        "identical content already uploaded as evidence {}",
        existing.evidence_id
      )));
    }

    let (media_kind, mismatch) = match resolve_kind(upload.declared_kind, &upload.bytes) {
      Ok(kind) => (kind, None),
      Err(KindProblem::Unrecognised) => {
        return Err(Error::UnsupportedFormat(KindProblem::Unrecognised.describe()));
      }
      Err(problem @ KindProblem::Mismatch { declared, .. }) => (declared, Some(problem)),
    };

    let size_bytes = upload.bytes.len() as u64;
    let artifact = self
      .blobs
      .store(upload.bytes.clone())
      .await
      .map_err(Error::store)?;
    let mut item = self
      .store
      .add_evidence(NewEvidence {
        audit_id,
        artifact,
        filename: upload.filename,
        content_hash: hash,
        size_bytes,
        media_kind,
        uploaded_by: actor.clone(),
      })
      .await
      .map_err(Error::store)?;
    info!(evidence_id = %item.evidence_id, %media_kind, size_bytes, "evidence stored");

    item.begin_processing()?;
    self
      .store
      .update_evidence(item.clone())
      .await
      .map_err(Error::store)?;
    Ok(Admitted {
      item,
      bytes: upload.bytes,
      mismatch,
    })
  }

  /// Run extraction for a `processing` item. Every problem, storage
  /// included, comes back as a failure to record on the item.
  async fn extract(
    &self,
    item: &EvidenceItem,
    bytes: Bytes,
  ) -> Result<ExtractedContent, ExtractionFailure> {
    let limit = self.config.max_artifact_bytes;
    if item.size_bytes > limit {
      return Err(analysis_failure(AnalysisError::ContentTooLarge {
        size: item.size_bytes,
        limit,
      }));
    }
    if let Some(content) = self.reuse_extraction(item).await {
      debug!(evidence_id = %item.evidence_id, "reusing extraction of identical content");
      return Ok(content);
    }

    match item.media_kind {
      MediaKind::Text => String::from_utf8(bytes.to_vec())
        .map(|text| ExtractedContent {
          text,
          segments: Vec::new(),
        })
        .map_err(|e| failure(FailureCause::UnsupportedFormat, e.to_string())),
      MediaKind::Video => self.extract_video(&item.artifact).await,
      kind => self
        .gate
        .run(self.analysis.extract_text(&item.artifact, kind))
        .await
        .map(normalise)
        .map_err(analysis_failure),
    }
  }

  /// Keyframe descriptions and the audio-track transcript, fused. Either
  /// half may be missing as unsupported; both missing fails the item.
  async fn extract_video(
    &self,
    handle: &ArtifactHandle,
  ) -> Result<ExtractedContent, ExtractionFailure> {
    let (frames, speech) = tokio::join!(
      self
        .gate
        .run(self.analysis.extract_text(handle, MediaKind::Video)),
      self
        .gate
        .run(self.analysis.extract_text(handle, MediaKind::Audio)),
    );

    let frames = match frames {
      Ok(RawExtraction::Keyframes(frames)) => Some(frames),
      Ok(other) => Some(untimed_transcript(normalise(other).text)),
      Err(AnalysisError::UnsupportedFormat(detail)) => {
        debug!(%handle, %detail, "no keyframes; using transcript only");
        None
      }
      Err(e) => return Err(analysis_failure(e)),
    };
    let speech = match speech {
      Ok(RawExtraction::Transcript { text, utterances }) if utterances.is_empty() => {
        Some(untimed_transcript(text))
      }
      Ok(RawExtraction::Transcript { utterances, .. }) => Some(utterances),
      Ok(other) => Some(untimed_transcript(normalise(other).text)),
      Err(AnalysisError::UnsupportedFormat(detail)) => {
        debug!(%handle, %detail, "no audio track; using keyframes only");
        None
      }
      Err(e) => return Err(analysis_failure(e)),
    };

    if frames.is_none() && speech.is_none() {
      return Err(failure(
        FailureCause::UnsupportedFormat,
        "neither keyframes nor an audio track could be extracted",
      ));
    }
    Ok(fuse_video(frames.unwrap_or_default(), speech.unwrap_or_default()))
  }

  /// Content already extracted from identical bytes of the same kind in
  /// another audit. A failed lookup counts as a miss.
  async fn reuse_extraction(&self, item: &EvidenceItem) -> Option<ExtractedContent> {
    let twins = match self
      .store
      .find_evidence_by_hash(item.content_hash.clone(), None)
      .await
    {
      Ok(twins) => twins,
      Err(e) => {
        warn!(evidence_id = %item.evidence_id, error = %e, "reuse lookup failed; extracting afresh");
        return None;
      }
    };
    twins.into_iter().find_map(|twin| {
      (twin.evidence_id != item.evidence_id
        && twin.audit_id != item.audit_id
        && twin.media_kind == item.media_kind
        && twin.status == ExtractionStatus::Extracted)
        .then_some(twin.content)
        .flatten()
    })
  }

  /// Log when results land on an audit that was archived while extraction
  /// ran. The results are still written so no item stays `processing`.
  async fn note_if_locked(&self, audit_id: Uuid) -> Result<()> {
    let audit = self.load_audit(audit_id).await?;
    if audit.state.is_locked() {
      warn!(%audit_id, state = %audit.state, "recording extraction results on a locked audit");
    }
    Ok(())
  }

  /// Record the outcome on the item. Call with the audit lock held. Fails
  /// with not-found when the item was deleted while extraction ran.
  async fn finish(
    &self,
    mut item: EvidenceItem,
    outcome: Result<ExtractedContent, ExtractionFailure>,
  ) -> Result<EvidenceItem> {
    let now = Utc::now();
    match outcome {
      Ok(content) => {
        info!(evidence_id = %item.evidence_id, chars = content.text.len(), "extraction succeeded");
        item.mark_extracted(content, now)?;
      }
      Err(f) => {
        warn!(evidence_id = %item.evidence_id, cause = %f.cause, detail = %f.detail, "extraction failed");
        item.mark_failed(f, now)?;
      }
    }
    let updated = self
      .store
      .update_evidence(item.clone())
      .await
      .map_err(Error::store)?;
    if !updated {
      return Err(Error::not_found("evidence", item.evidence_id));
    }
    Ok(item)
  }

  /// Put a failed item through extraction again. Nothing is retried unless a
  /// caller asks for it here. Like uploads, extraction runs without the
  /// audit lock.
  #[instrument(skip(self))]
  pub async fn resubmit(&self, evidence_id: Uuid, actor: &Actor) -> Result<EvidenceItem> {
    let audit_id = self.get_evidence(evidence_id).await?.audit_id;
    let item = {
      let _guard = self.locks.lock(audit_id).await;
      let audit = self.load_audit(audit_id).await?;
      ensure_accepts_evidence(&audit)?;

      let mut item = self.get_evidence(evidence_id).await?;
      item.reset_for_resubmission()?;
      item.begin_processing()?;
      self
        .store
        .update_evidence(item.clone())
        .await
        .map_err(Error::store)?;
      info!(%evidence_id, %actor, "evidence resubmitted");
      item
    };

    let outcome = self.reextract(&item).await;

    let _guard = self.locks.lock(audit_id).await;
    self.note_if_locked(audit_id).await?;
    self.finish(item, outcome).await
  }

  async fn reextract(&self, item: &EvidenceItem) -> Result<ExtractedContent, ExtractionFailure> {
    let bytes = self
      .blobs
      .retrieve(&item.artifact)
      .await
      .map_err(|e| failure(FailureCause::ExternalServiceError, e.to_string()))?;
    resolve_kind(Some(item.media_kind), &bytes)
      .map_err(|problem| failure(FailureCause::UnsupportedFormat, problem.describe()))?;
    self.extract(item, bytes).await
  }

  pub async fn get_evidence(&self, evidence_id: Uuid) -> Result<EvidenceItem> {
    self
      .store
      .get_evidence(evidence_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::not_found("evidence", evidence_id))
  }

  pub async fn list_evidence(&self, audit_id: Uuid) -> Result<Vec<EvidenceItem>> {
    self.load_audit(audit_id).await?;
    self
      .store
      .list_evidence(audit_id)
      .await
      .map_err(Error::store)
  }

  /// Delete an item with its links. Overridden assessments that relied on a
  /// confirmed link are flagged for review.
  #[instrument(skip(self))]
  pub async fn delete_evidence(&self, evidence_id: Uuid, actor: &Actor) -> Result<()> {
    let audit_id = self.get_evidence(evidence_id).await?.audit_id;
    let _guard = self.locks.lock(audit_id).await;
    let audit = self.load_audit(audit_id).await?;
    audit.ensure_unlocked()?;
    let item = self.get_evidence(evidence_id).await?;

    let links = self
      .store
      .list_links(LinkQuery::audit(audit_id).evidence(evidence_id))
      .await
      .map_err(Error::store)?;
    self
      .store
      .delete_evidence(evidence_id)
      .await
      .map_err(Error::store)?;
    for link in links.iter().filter(|l| l.is_confirmed()) {
      self.flag_review(audit_id, link.criterion_id, actor).await?;
    }
    self.release_blob(&item.content_hash, &item.artifact).await;
    info!(%evidence_id, %audit_id, %actor, "evidence deleted");
    Ok(())
  }

  /// Delete the bytes once no evidence item refers to them any more.
  /// Failures are logged; an orphaned blob is harmless.
  pub(crate) async fn release_blob(&self, content_hash: &str, artifact: &ArtifactHandle) {
    let still_used = match self
      .store
      .find_evidence_by_hash(content_hash.to_owned(), None)
      .await
    {
      Ok(items) => !items.is_empty(),
      Err(e) => {
        warn!(%artifact, error = %e, "could not check blob references");
        return;
      }
    };
    if still_used {
      return;
    }
    if let Err(e) = self.blobs.delete(artifact).await {
      warn!(%artifact, error = %e, "failed to delete blob");
    }
  }
}
