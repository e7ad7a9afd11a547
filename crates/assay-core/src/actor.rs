//! The identity recorded on every mutation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identity of whoever performed a mutation. Supplied by the identity
/// collaborator; authorisation has already happened by the time the engine
/// sees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  /// The actor used for changes made by the engine itself (auto-accepted
  /// links, computed assessments).
  pub fn system() -> Self { Self("system".to_owned()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Actor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}
