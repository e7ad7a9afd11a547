//! Error type for `assay-providers`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  /// A handle that this blob store could not have issued.
  #[error("invalid artifact handle: {0:?}")]
  InvalidHandle(String),

  #[error("artifact not found: {0}")]
  NotFound(String),

  #[error("configuration error: {0}")]
  Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
