//! Handlers for `/audits` endpoints: records, settings, selection and the
//! lifecycle.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/audits` | Optional `?company_id` |
//! | `POST`   | `/audits` | Body: [`NewAudit`]; engine defaults fill missing settings |
//! | `GET`    | `/audits/:id` | |
//! | `DELETE` | `/audits/:id` | Removes evidence, links and assessments |
//! | `PUT`    | `/audits/:id/settings` | Body: [`SettingsBody`] |
//! | `GET`    | `/audits/:id/selection` | |
//! | `PUT`    | `/audits/:id/selection` | Body: `[{"criterion_id":"..."}]` |
//! | `POST`   | `/audits/:id/lifecycle/:transition` | See [`Transition`] |

use assay_core::audit::{Audit, AuditSettings, NewAudit, Selection};
use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
  AppState,
  auth::{Capability, Principal},
  error::ApiError,
};

// ─── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub company_id: Option<Uuid>,
}

/// `GET /audits[?company_id=<id>]`
pub async fn list(
  State(state): State<AppState>,
  principal: Principal,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Audit>>, ApiError> {
  principal.require(Capability::View)?;
  Ok(Json(state.engine.list_audits(params.company_id).await?))
}

/// `POST /audits`
pub async fn create(
  State(state): State<AppState>,
  principal: Principal,
  Json(body): Json<NewAudit>,
) -> Result<impl IntoResponse, ApiError> {
  let actor = principal.require(Capability::ManageAudits)?;
  let audit = state.engine.create_audit(body, &actor).await?;
  Ok((StatusCode::CREATED, Json(audit)))
}

/// `GET /audits/:id`
pub async fn get_one(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<Audit>, ApiError> {
  principal.require(Capability::View)?;
  Ok(Json(state.engine.get_audit(id).await?))
}

/// `DELETE /audits/:id`
pub async fn delete(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
  let actor = principal.require(Capability::ManageAudits)?;
  state.engine.delete_audit(id, &actor).await?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Settings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SettingsBody {
  pub settings:         AuditSettings,
  /// When present, the update fails with a conflict unless the stored audit
  /// is still at this version.
  #[serde(default)]
  pub expected_version: Option<u64>,
}

/// `PUT /audits/:id/settings`
pub async fn update_settings(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
  Json(body): Json<SettingsBody>,
) -> Result<Json<Audit>, ApiError> {
  let actor = principal.require(Capability::ManageAudits)?;
  let audit = state
    .engine
    .update_settings(id, body.settings, body.expected_version, &actor)
    .await?;
  Ok(Json(audit))
}

// ─── Selection ────────────────────────────────────────────────────────────────

/// `GET /audits/:id/selection`
pub async fn get_selection(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<Selection>>, ApiError> {
  principal.require(Capability::View)?;
  Ok(Json(state.engine.get_selection(id).await?))
}

/// `PUT /audits/:id/selection`
pub async fn select(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
  Json(body): Json<Vec<Selection>>,
) -> Result<Json<Audit>, ApiError> {
  let actor = principal.require(Capability::ManageAudits)?;
  Ok(Json(state.engine.select_criteria(id, body, &actor).await?))
}

// ─── Lifecycle ────────────────────────────────────────────────────────────────

/// The last path segment of `/audits/:id/lifecycle/:transition`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transition {
  /// `criteria_selected → evidence_collection`
  StartEvidenceCollection,
  /// `evidence_collection → scoring`
  StartScoring,
  /// `scoring → evidence_collection`
  Reopen,
  Finalize,
  Unfinalize,
  Archive,
}

/// `POST /audits/:id/lifecycle/:transition`
pub async fn transition(
  State(state): State<AppState>,
  principal: Principal,
  Path((id, transition)): Path<(Uuid, Transition)>,
) -> Result<Json<Audit>, ApiError> {
  let actor = principal.require(Capability::ManageAudits)?;
  let engine = &state.engine;
  let audit = match transition {
    Transition::StartEvidenceCollection => engine.start_evidence_collection(id, &actor).await?,
    Transition::StartScoring => engine.start_scoring(id, &actor).await?,
    Transition::Reopen => engine.reopen(id, &actor).await?,
    Transition::Finalize => engine.finalize(id, &actor).await?,
    Transition::Unfinalize => engine.unfinalize(id, &actor).await?,
    Transition::Archive => engine.archive(id, &actor).await?,
  };
  Ok(Json(audit))
}
