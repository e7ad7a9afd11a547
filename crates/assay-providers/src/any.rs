//! Provider selection from configuration.

use assay_core::{
  analysis::{AnalysisError, AnalysisService, RawExtraction},
  blob::{ArtifactHandle, BlobStore},
  evidence::MediaKind,
};
use serde::{Deserialize, Serialize};

use crate::{
  error::Result,
  keyword::KeywordAnalysis,
  openai::{OpenAiAnalysis, OpenAiConfig},
};

/// Which analysis service to run.
///
/// ```toml
/// [analysis]
/// provider = "openai"
/// api_key  = "sk-..."
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum AnalysisConfig {
  #[default]
  Keyword,
  #[serde(rename = "openai")]
  OpenAi(OpenAiConfig),
}

pub enum AnyAnalysis<B> {
  Keyword(KeywordAnalysis<B>),
  OpenAi(OpenAiAnalysis<B>),
}

impl<B: BlobStore> AnyAnalysis<B> {
  pub fn from_config(config: AnalysisConfig, blobs: B) -> Result<Self> {
    Ok(match config {
      AnalysisConfig::Keyword => Self::Keyword(KeywordAnalysis::new(blobs)),
      AnalysisConfig::OpenAi(c) => Self::OpenAi(OpenAiAnalysis::new(c, blobs)?),
    })
  }

  pub fn name(&self) -> &'static str {
    match self {
      Self::Keyword(_) => "keyword",
      Self::OpenAi(_) => "openai",
    }
  }
}

impl<B: BlobStore> AnalysisService for AnyAnalysis<B> {
  async fn extract_text(
    &self,
    handle: &ArtifactHandle,
    kind: MediaKind,
  ) -> Result<RawExtraction, AnalysisError> {
    match self {
      Self::Keyword(a) => a.extract_text(handle, kind).await,
      Self::OpenAi(a) => a.extract_text(handle, kind).await,
    }
  }

  async fn semantic_score(&self, text: &str, reference: &str) -> Result<f32, AnalysisError> {
    match self {
      Self::Keyword(a) => a.semantic_score(text, reference).await,
      Self::OpenAi(a) => a.semantic_score(text, reference).await,
    }
  }

  async fn generate_questions(
    &self,
    criterion: &str,
    evidence: &str,
  ) -> Result<Vec<String>, AnalysisError> {
    match self {
      Self::Keyword(a) => a.generate_questions(criterion, evidence).await,
      Self::OpenAi(a) => a.generate_questions(criterion, evidence).await,
    }
  }
}
