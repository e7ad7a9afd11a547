//! Concrete collaborators for the Assay engine.
//!
//! - [`FsBlobStore`]: content-addressed artifact storage on the local disk
//! - [`OpenAiAnalysis`]: an OpenAI-compatible HTTP API for captions,
//!   transcripts and embeddings
//! - [`KeywordAnalysis`]: an offline, deterministic fallback that reads text
//!   formats only and scores by word overlap
//! - [`AnyAnalysis`]: whichever of the two the configuration picks

mod any;
mod fs;
mod keyword;
mod openai;

pub mod error;

pub use any::{AnalysisConfig, AnyAnalysis};
pub use error::{Error, Result};
pub use fs::FsBlobStore;
pub use keyword::KeywordAnalysis;
pub use openai::{OpenAiAnalysis, OpenAiConfig};

/// Split decoded document text into pages on form feeds.
pub(crate) fn pages(text: &str) -> Vec<String> {
  text.split('\x0c').map(str::to_owned).collect()
}
