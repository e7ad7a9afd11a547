//! Engine tuning knobs.

use std::time::Duration;

use assay_core::{Error, Result, audit::AuditSettings};
use serde::{Deserialize, Serialize};

fn default_relevance_threshold() -> f32 { 0.3 }

fn default_coverage_threshold() -> f32 { 0.6 }

fn default_auto_accept_threshold() -> f32 { 0.85 }

fn default_max_concurrent_analysis() -> usize { 4 }

fn default_analysis_timeout_secs() -> u64 { 60 }

fn default_max_artifact_bytes() -> u64 { 50 * 1024 * 1024 }

/// Thresholds and resource limits. Every field has a default, so an empty
/// `[engine]` table is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
  /// Suggestions scoring below this are dropped.
  #[serde(default = "default_relevance_threshold")]
  pub relevance_threshold:     f32,
  /// Summed link weight a level needs before it can be selected.
  #[serde(default = "default_coverage_threshold")]
  pub coverage_threshold:      f32,
  /// Default auto-accept threshold for audits created without settings.
  #[serde(default = "default_auto_accept_threshold")]
  pub auto_accept_threshold:   f32,
  /// Upper bound on in-flight calls to the analysis service.
  #[serde(default = "default_max_concurrent_analysis")]
  pub max_concurrent_analysis: usize,
  #[serde(default = "default_analysis_timeout_secs")]
  pub analysis_timeout_secs:   u64,
  #[serde(default = "default_max_artifact_bytes")]
  pub max_artifact_bytes:      u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      relevance_threshold:     default_relevance_threshold(),
      coverage_threshold:      default_coverage_threshold(),
      auto_accept_threshold:   default_auto_accept_threshold(),
      max_concurrent_analysis: default_max_concurrent_analysis(),
      analysis_timeout_secs:   default_analysis_timeout_secs(),
      max_artifact_bytes:      default_max_artifact_bytes(),
    }
  }
}

impl EngineConfig {
  pub fn analysis_timeout(&self) -> Duration {
    Duration::from_secs(self.analysis_timeout_secs)
  }

  /// Settings for an audit created without explicit ones.
  pub fn default_audit_settings(&self) -> AuditSettings {
    AuditSettings {
      auto_accept_threshold: self.auto_accept_threshold,
      ..AuditSettings::default()
    }
  }

  pub fn check(&self) -> Result<()> {
    for (name, value) in [
      ("relevance_threshold", self.relevance_threshold),
      ("coverage_threshold", self.coverage_threshold),
      ("auto_accept_threshold", self.auto_accept_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(Error::invalid(format!("{name} must lie in [0, 1], got {value}")));
      }
    }
    if self.max_concurrent_analysis == 0 {
      return Err(Error::invalid("max_concurrent_analysis must be at least 1"));
    }
    if self.analysis_timeout_secs == 0 {
      return Err(Error::invalid("analysis_timeout_secs must be at least 1"));
    }
    Ok(())
  }
}
