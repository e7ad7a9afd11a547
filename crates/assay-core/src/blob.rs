//! The storage collaborator: opaque bytes in, opaque handle out.

use std::{fmt, future::Future};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Reference to stored artifact bytes. Only the [`BlobStore`] that issued it
/// knows what it means.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactHandle(String);

impl ArtifactHandle {
  pub fn new(raw: impl Into<String>) -> Self { Self(raw.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ArtifactHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Abstraction over wherever raw uploads live. The engine never reasons about
/// the medium.
pub trait BlobStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn store(
    &self,
    bytes: Bytes,
  ) -> impl Future<Output = Result<ArtifactHandle, Self::Error>> + Send + '_;

  fn retrieve<'a>(
    &'a self,
    handle: &'a ArtifactHandle,
  ) -> impl Future<Output = Result<Bytes, Self::Error>> + Send + 'a;

  /// Remove the bytes behind `handle`. Deleting an unknown handle is not an
  /// error.
  fn delete<'a>(
    &'a self,
    handle: &'a ArtifactHandle,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
