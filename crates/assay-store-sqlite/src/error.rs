//! Error type for `assay-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A text column held a value no enum variant answers to.
  #[error("unknown {column} value: {value:?}")]
  UnknownVariant {
    column: &'static str,
    value:  String,
  },

  #[error("audit not found: {0}")]
  AuditNotFound(uuid::Uuid),

  #[error("company not found: {0}")]
  CompanyNotFound(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
