//! Handlers for maturity assessments.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/audits/:id/assessments` | |
//! | `POST`   | `/audits/:id/assessments` | Recompute every in-scope criterion |
//! | `GET`    | `/audits/:id/assessments/:criterion_id` | 404 until computed |
//! | `POST`   | `/audits/:id/assessments/:criterion_id/compute` | |
//! | `PUT`    | `/audits/:id/assessments/:criterion_id/override` | Body: [`OverrideBody`] |
//! | `DELETE` | `/audits/:id/assessments/:criterion_id/override` | |

use assay_core::{assessment::MaturityAssessment, criterion::MaturityLevel};
use axum::{
  Json,
  extract::{Path, State},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
  AppState,
  auth::{Capability, Principal},
  error::ApiError,
};

/// `GET /audits/:id/assessments`
pub async fn list(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<MaturityAssessment>>, ApiError> {
  principal.require(Capability::View)?;
  Ok(Json(state.engine.list_assessments(id).await?))
}

/// `POST /audits/:id/assessments`
pub async fn compute_all(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<MaturityAssessment>>, ApiError> {
  let actor = principal.require(Capability::Score)?;
  Ok(Json(state.engine.compute_all(id, &actor).await?))
}

/// `GET /audits/:id/assessments/:criterion_id`
pub async fn get_one(
  State(state): State<AppState>,
  principal: Principal,
  Path((id, criterion_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<MaturityAssessment>, ApiError> {
  principal.require(Capability::View)?;
  Ok(Json(state.engine.get_assessment(id, criterion_id).await?))
}

/// `POST /audits/:id/assessments/:criterion_id/compute`
pub async fn compute(
  State(state): State<AppState>,
  principal: Principal,
  Path((id, criterion_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<MaturityAssessment>, ApiError> {
  let actor = principal.require(Capability::Score)?;
  let assessment = state
    .engine
    .compute_assessment(id, criterion_id, &actor)
    .await?;
  Ok(Json(assessment))
}

#[derive(Debug, Deserialize)]
pub struct OverrideBody {
  pub level:     MaturityLevel,
  pub rationale: String,
}

/// `PUT /audits/:id/assessments/:criterion_id/override`
pub async fn set_override(
  State(state): State<AppState>,
  principal: Principal,
  Path((id, criterion_id)): Path<(Uuid, Uuid)>,
  Json(body): Json<OverrideBody>,
) -> Result<Json<MaturityAssessment>, ApiError> {
  let actor = principal.require(Capability::Score)?;
  let assessment = state
    .engine
    .set_assessment(id, criterion_id, body.level, body.rationale, &actor)
    .await?;
  Ok(Json(assessment))
}

/// `DELETE /audits/:id/assessments/:criterion_id/override`
pub async fn clear_override(
  State(state): State<AppState>,
  principal: Principal,
  Path((id, criterion_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<MaturityAssessment>, ApiError> {
  let actor = principal.require(Capability::Score)?;
  Ok(Json(state.engine.clear_override(id, criterion_id, &actor).await?))
}
