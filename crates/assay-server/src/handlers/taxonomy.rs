//! Handlers for the base taxonomy and per-audit criteria.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/taxonomy` | Base taxonomy, depth-first |
//! | `POST`   | `/taxonomy` | Body: criteria documents, `[{"section":..,"criteria":[..]}]` |
//! | `GET`    | `/taxonomy/validation` | 422 with the problem list if invalid |
//! | `GET`    | `/criteria/:id` | Any node, base or custom |
//! | `GET`    | `/audits/:id/criteria` | Base plus the audit's custom criteria |
//! | `POST`   | `/audits/:id/criteria` | Body: [`NewCriterion`] |
//! | `PUT`    | `/audits/:id/criteria/:criterion_id` | Custom criteria only |
//! | `DELETE` | `/audits/:id/criteria/:criterion_id` | Custom criteria only |
//! | `POST`   | `/audits/:id/criteria/:criterion_id/customise` | Copy a base subtree into the audit |
//! | `GET`    | `/audits/:id/validation` | |

use assay_core::{
  criterion::{CriterionNode, NewCriterion},
  taxonomy::SectionDocument,
};
use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  AppState,
  auth::{Capability, Principal},
  error::ApiError,
};

#[derive(Debug, Serialize)]
pub struct Validation {
  pub valid: bool,
}

// ─── Base taxonomy ────────────────────────────────────────────────────────────

/// `GET /taxonomy`
pub async fn list_base(
  State(state): State<AppState>,
  principal: Principal,
) -> Result<Json<Vec<CriterionNode>>, ApiError> {
  principal.require(Capability::View)?;
  Ok(Json(state.engine.base_taxonomy().await?))
}

/// `POST /taxonomy`
pub async fn import(
  State(state): State<AppState>,
  principal: Principal,
  Json(body): Json<Vec<SectionDocument>>,
) -> Result<impl IntoResponse, ApiError> {
  let actor = principal.require(Capability::ManageTaxonomy)?;
  let nodes = state.engine.import_taxonomy(body, &actor).await?;
  Ok((StatusCode::CREATED, Json(nodes)))
}

/// `GET /taxonomy/validation`
pub async fn validate_base(
  State(state): State<AppState>,
  principal: Principal,
) -> Result<Json<Validation>, ApiError> {
  principal.require(Capability::View)?;
  state.engine.validate_taxonomy(None).await?;
  Ok(Json(Validation { valid: true }))
}

/// `GET /criteria/:id`
pub async fn get_one(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<CriterionNode>, ApiError> {
  principal.require(Capability::View)?;
  Ok(Json(state.engine.get_criterion(id).await?))
}

// ─── Audit criteria ───────────────────────────────────────────────────────────

/// `GET /audits/:id/criteria`
pub async fn list_audit(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<CriterionNode>>, ApiError> {
  principal.require(Capability::View)?;
  Ok(Json(state.engine.audit_criteria(id).await?))
}

/// `POST /audits/:id/criteria`
pub async fn add_custom(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
  Json(body): Json<NewCriterion>,
) -> Result<impl IntoResponse, ApiError> {
  let actor = principal.require(Capability::ManageAudits)?;
  let node = state.engine.add_custom_criterion(id, body, &actor).await?;
  Ok((StatusCode::CREATED, Json(node)))
}

/// `PUT /audits/:id/criteria/:criterion_id`
pub async fn update_custom(
  State(state): State<AppState>,
  principal: Principal,
  Path((id, criterion_id)): Path<(Uuid, Uuid)>,
  Json(body): Json<NewCriterion>,
) -> Result<Json<CriterionNode>, ApiError> {
  let actor = principal.require(Capability::ManageAudits)?;
  let node = state
    .engine
    .update_custom_criterion(id, criterion_id, body, &actor)
    .await?;
  Ok(Json(node))
}

/// `DELETE /audits/:id/criteria/:criterion_id`
pub async fn delete_custom(
  State(state): State<AppState>,
  principal: Principal,
  Path((id, criterion_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
  let actor = principal.require(Capability::ManageAudits)?;
  state
    .engine
    .delete_custom_criterion(id, criterion_id, &actor)
    .await?;
  Ok(StatusCode::NO_CONTENT)
}

/// `POST /audits/:id/criteria/:criterion_id/customise`
pub async fn customise(
  State(state): State<AppState>,
  principal: Principal,
  Path((id, criterion_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
  let actor = principal.require(Capability::ManageAudits)?;
  let copies = state
    .engine
    .customise_subtree(id, criterion_id, &actor)
    .await?;
  Ok((StatusCode::CREATED, Json(copies)))
}

/// `GET /audits/:id/validation`
pub async fn validate_audit(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<Validation>, ApiError> {
  principal.require(Capability::View)?;
  state.engine.validate_taxonomy(Some(id)).await?;
  Ok(Json(Validation { valid: true }))
}
