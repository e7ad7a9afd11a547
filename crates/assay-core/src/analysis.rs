//! The AI analysis collaborator contract.
//!
//! The engine treats the provider as a black box: submit an artifact, get
//! extracted text back; submit two texts, get a similarity in `[0, 1]`;
//! submit a criterion and its evidence, get follow-up questions.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  Error,
  blob::ArtifactHandle,
  evidence::{FailureCause, MediaKind},
};

/// A stretch of text anchored in time, in milliseconds from the start of the
/// recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedText {
  pub start_ms: u64,
  pub end_ms:   Option<u64>,
  pub text:     String,
}

/// What a provider returns for one artifact, before normalisation into
/// [`crate::evidence::ExtractedContent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RawExtraction {
  /// Document text, one entry per page.
  Pages(Vec<String>),
  /// Free text with no further structure.
  Text(String),
  /// A description of an image.
  Caption(String),
  /// Speech-to-text output. `utterances` is empty when the provider does not
  /// supply timestamps.
  Transcript {
    text:       String,
    utterances: Vec<TimedText>,
  },
  /// Descriptions of sampled video frames.
  Keyframes(Vec<TimedText>),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
  #[error("analysis service unavailable: {0}")]
  Unavailable(String),

  #[error("analysis request timed out")]
  Timeout,

  #[error("unsupported format: {0}")]
  UnsupportedFormat(String),

  #[error("content too large: {size} bytes exceeds {limit}")]
  ContentTooLarge { size: u64, limit: u64 },
}

impl AnalysisError {
  /// The failure cause recorded on an evidence item that failed this way.
  pub fn cause(&self) -> FailureCause {
    match self {
      Self::Unavailable(_) => FailureCause::ExternalServiceError,
      Self::Timeout => FailureCause::Timeout,
      Self::UnsupportedFormat(_) => FailureCause::UnsupportedFormat,
      Self::ContentTooLarge { .. } => FailureCause::ContentTooLarge,
    }
  }
}

impl From<AnalysisError> for Error {
  fn from(e: AnalysisError) -> Self {
    match e {
      AnalysisError::Unavailable(m) => Error::AnalysisUnavailable(m),
      AnalysisError::Timeout => Error::Timeout,
      AnalysisError::UnsupportedFormat(m) => Error::UnsupportedFormat(m),
      e @ AnalysisError::ContentTooLarge { .. } => Error::invalid(e.to_string()),
    }
  }
}

/// The external AI capability.
pub trait AnalysisService: Send + Sync {
  /// Extract text from the artifact behind `handle`, interpreting it as
  /// `kind`. For [`MediaKind::Video`] providers return
  /// [`RawExtraction::Keyframes`]; the engine separately asks for the audio
  /// track with [`MediaKind::Audio`].
  fn extract_text<'a>(
    &'a self,
    handle: &'a ArtifactHandle,
    kind: MediaKind,
  ) -> impl Future<Output = Result<RawExtraction, AnalysisError>> + Send + 'a;

  /// Semantic alignment of `text` with `reference`, in `[0, 1]`.
  fn semantic_score<'a>(
    &'a self,
    text: &'a str,
    reference: &'a str,
  ) -> impl Future<Output = Result<f32, AnalysisError>> + Send + 'a;

  /// Questions an auditor could put to the organisation about one criterion.
  ///
  /// `criterion` is the criterion's reference text and `evidence` the text
  /// linked to it so far, possibly empty. Where the evidence already supports
  /// a level the questions dig deeper; where it does not they target the
  /// gaps.
  fn generate_questions<'a>(
    &'a self,
    criterion: &'a str,
    evidence: &'a str,
  ) -> impl Future<Output = Result<Vec<String>, AnalysisError>> + Send + 'a;
}
