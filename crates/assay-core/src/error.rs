//! Error types for `assay-core`.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{audit::AuditState, criterion::MaturityLevel};

/// A single reason a taxonomy or an input was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Problem {
  /// The listed nodes form a parent cycle.
  Cycle { nodes: Vec<Uuid> },
  MissingMaturityText {
    criterion_id: Uuid,
    level:        MaturityLevel,
  },
  /// A node names a parent that is not part of the tree.
  DanglingParent { criterion_id: Uuid, parent_id: Uuid },
  Input { message: String },
}

impl fmt::Display for Problem {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Cycle { nodes } => {
        let ids: Vec<String> = nodes.iter().map(Uuid::to_string).collect();
        write!(f, "cycle through [{}]", ids.join(", "))
      }
      Self::MissingMaturityText { criterion_id, level } => {
        write!(f, "criterion {criterion_id} has no {level} maturity text")
      }
      Self::DanglingParent { criterion_id, parent_id } => {
        write!(f, "criterion {criterion_id} names unknown parent {parent_id}")
      }
      Self::Input { message } => f.write_str(message),
    }
  }
}

/// The full list of problems carried by [`Error::Validation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Problems(pub Vec<Problem>);

impl fmt::Display for Problems {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, p) in self.0.iter().enumerate() {
      if i > 0 {
        f.write_str("; ")?;
      }
      write!(f, "{p}")?;
    }
    Ok(())
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("validation failed: {0}")]
  Validation(Problems),

  #[error("{kind} not found: {id}")]
  NotFound { kind: &'static str, id: Uuid },

  #[error("unsupported format: {0}")]
  UnsupportedFormat(String),

  #[error("analysis service unavailable: {0}")]
  AnalysisUnavailable(String),

  #[error("external call timed out")]
  Timeout,

  #[error("audit {audit_id} has {} unassessed in-scope criteria", unassessed.len())]
  IncompleteAssessment { audit_id: Uuid, unassessed: Vec<Uuid> },

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("invalid audit transition from {from} to {to}")]
  InvalidTransition { from: AuditState, to: AuditState },

  #[error("audit {audit_id} is {state} and cannot be modified")]
  AuditLocked { audit_id: Uuid, state: AuditState },

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Shorthand for a single free-text input problem.
  pub fn invalid(message: impl Into<String>) -> Self {
    Self::Validation(Problems(vec![Problem::Input {
      message: message.into(),
    }]))
  }

  pub fn not_found(kind: &'static str, id: Uuid) -> Self {
    Self::NotFound { kind, id }
  }

  /// Box a backend error.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  /// Whether the caller may retry the same request unchanged (after reloading
  /// state in the case of a conflict).
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      Self::AnalysisUnavailable(_) | Self::Timeout | Self::Conflict(_)
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
