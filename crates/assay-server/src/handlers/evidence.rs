//! Handlers for evidence upload and management.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `POST`   | `/audits/:id/evidence` | Body: [`UploadBody`]; one outcome per file |
//! | `GET`    | `/audits/:id/evidence` | |
//! | `GET`    | `/evidence/:id` | |
//! | `DELETE` | `/evidence/:id` | Also drops the item's links |
//! | `POST`   | `/evidence/:id/resubmit` | Retry a failed extraction |

use assay_core::evidence::{EvidenceItem, MediaKind};
use assay_engine::classifier::{Upload, UploadOutcome};
use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  AppState,
  auth::{Capability, Principal},
  error::{ApiError, ErrorBody},
};

// ─── Upload ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UploadFile {
  #[serde(default)]
  pub filename:       Option<String>,
  /// Declared kind; the content signature decides when absent.
  #[serde(default)]
  pub kind:           Option<MediaKind>,
  pub content_base64: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadBody {
  pub files: Vec<UploadFile>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OutcomeBody {
  Stored {
    item: EvidenceItem,
  },
  Rejected {
    filename: Option<String>,
    error:    ErrorBody,
  },
}

impl From<UploadOutcome> for OutcomeBody {
  fn from(outcome: UploadOutcome) -> Self {
    match outcome {
      UploadOutcome::Stored(item) => Self::Stored { item },
      UploadOutcome::Rejected { filename, error } => Self::Rejected {
        filename,
        error: ErrorBody::from_core(&error),
      },
    }
  }
}

/// `POST /audits/:id/evidence`
///
/// Responds 200 even when some files were rejected or failed extraction;
/// each outcome carries its own status.
pub async fn upload(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
  Json(body): Json<UploadBody>,
) -> Result<Json<Vec<OutcomeBody>>, ApiError> {
  let actor = principal.require(Capability::UploadEvidence)?;
  if body.files.is_empty() {
    return Err(ApiError::BadRequest("no files in upload".into()));
  }

  let mut uploads = Vec::with_capacity(body.files.len());
  for (index, file) in body.files.into_iter().enumerate() {
    let bytes = B64.decode(file.content_base64.as_bytes()).map_err(|e| {
      ApiError::BadRequest(format!("file {index}: content_base64 is not base64: {e}"))
    })?;
    uploads.push(Upload {
      filename:      file.filename,
      declared_kind: file.kind,
      bytes:         Bytes::from(bytes),
    });
  }

  let outcomes = state.engine.upload_batch(id, uploads, &actor).await?;
  Ok(Json(outcomes.into_iter().map(OutcomeBody::from).collect()))
}

// ─── Read ─────────────────────────────────────────────────────────────────────

/// `GET /audits/:id/evidence`
pub async fn list(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<EvidenceItem>>, ApiError> {
  principal.require(Capability::View)?;
  Ok(Json(state.engine.list_evidence(id).await?))
}

/// `GET /evidence/:id`
pub async fn get_one(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<EvidenceItem>, ApiError> {
  principal.require(Capability::View)?;
  Ok(Json(state.engine.get_evidence(id).await?))
}

// ─── Mutations ────────────────────────────────────────────────────────────────

/// `POST /evidence/:id/resubmit`
pub async fn resubmit(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<EvidenceItem>, ApiError> {
  let actor = principal.require(Capability::UploadEvidence)?;
  Ok(Json(state.engine.resubmit(id, &actor).await?))
}

/// `DELETE /evidence/:id`
pub async fn delete(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
  let actor = principal.require(Capability::UploadEvidence)?;
  state.engine.delete_evidence(id, &actor).await?;
  Ok(StatusCode::NO_CONTENT)
}
