//! Handlers for evidence-to-criterion links.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `POST`   | `/evidence/:id/suggestions` | Body: `{"candidates":[..]}` (optional) |
//! | `POST`   | `/evidence/:id/links` | Body: [`LinkBody`]; manual, confirmed link |
//! | `GET`    | `/audits/:id/links` | Optional `?evidence_id`, `criterion_id`, `status` |
//! | `GET`    | `/links/:id` | |
//! | `POST`   | `/links/:id/confirm` | Idempotent |
//! | `DELETE` | `/links/:id` | Reject |

use assay_core::{
  criterion::MaturityLevel,
  link::{EvidenceLink, LinkStatus},
  store::LinkQuery,
};
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

#[derive(Debug, Deserialize)]
pub struct SuggestBody {
  /// Restrict scoring to these criteria. Defaults to the audit's scope.
  #[serde(default)]
  pub candidates: Option<Vec<Uuid>>,
}

/// `POST /evidence/:id/suggestions`
pub async fn suggest(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
  body: Option<Json<SuggestBody>>,
) -> Result<Json<Vec<EvidenceLink>>, ApiError> {
  let actor = principal.require(Capability::ManageLinks)?;
  let candidates = body.and_then(|Json(b)| b.candidates);
  Ok(Json(state.engine.suggest_links(id, candidates, &actor).await?))
}

#[derive(Debug, Deserialize)]
pub struct LinkBody {
  pub criterion_id: Uuid,
  pub weight:       f32,
  #[serde(default)]
  pub level_hint:   Option<MaturityLevel>,
}

/// `POST /evidence/:id/links`
pub async fn link(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
  Json(body): Json<LinkBody>,
) -> Result<impl IntoResponse, ApiError> {
  let actor = principal.require(Capability::ManageLinks)?;
  let link = state
    .engine
    .link_evidence(id, body.criterion_id, body.weight, body.level_hint, &actor)
    .await?;
  Ok((StatusCode::CREATED, Json(link)))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub evidence_id:  Option<Uuid>,
  pub criterion_id: Option<Uuid>,
  pub status:       Option<LinkStatus>,
}

/// `GET /audits/:id/links`
pub async fn list(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<EvidenceLink>>, ApiError> {
  principal.require(Capability::View)?;
  let query = LinkQuery {
    audit_id:     Some(id),
    evidence_id:  params.evidence_id,
    criterion_id: params.criterion_id,
    status:       params.status,
  };
  Ok(Json(state.engine.list_links(id, query).await?))
}

/// `GET /links/:id`
pub async fn get_one(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<EvidenceLink>, ApiError> {
  principal.require(Capability::View)?;
  Ok(Json(state.engine.get_link(id).await?))
}

/// `POST /links/:id/confirm`
pub async fn confirm(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<EvidenceLink>, ApiError> {
  let actor = principal.require(Capability::ManageLinks)?;
  Ok(Json(state.engine.confirm_link(id, &actor).await?))
}

/// `DELETE /links/:id`
pub async fn reject(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
  let actor = principal.require(Capability::ManageLinks)?;
  state.engine.reject_link(id, &actor).await?;
  Ok(StatusCode::NO_CONTENT)
}
