//! Handlers for `/companies` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/companies` | |
//! | `POST`   | `/companies` | Body: `{"name":"Acme","sector":"retail"}` |
//! | `GET`    | `/companies/:id` | 404 if not found |
//! | `DELETE` | `/companies/:id` | `?cascade=true` also deletes its audits |

use assay_core::audit::{Company, NewCompany};
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

/// `GET /companies`
pub async fn list(
  State(state): State<AppState>,
  principal: Principal,
) -> Result<Json<Vec<Company>>, ApiError> {
  principal.require(Capability::View)?;
  Ok(Json(state.engine.list_companies().await?))
}

/// `POST /companies`
pub async fn create(
  State(state): State<AppState>,
  principal: Principal,
  Json(body): Json<NewCompany>,
) -> Result<impl IntoResponse, ApiError> {
  let actor = principal.require(Capability::ManageCompanies)?;
  let company = state.engine.create_company(body, &actor).await?;
  Ok((StatusCode::CREATED, Json(company)))
}

/// `GET /companies/:id`
pub async fn get_one(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<Company>, ApiError> {
  principal.require(Capability::View)?;
  Ok(Json(state.engine.get_company(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
  #[serde(default)]
  pub cascade: bool,
}

/// `DELETE /companies/:id[?cascade=true]`
pub async fn delete(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
  Query(params): Query<DeleteParams>,
) -> Result<StatusCode, ApiError> {
  let actor = principal.require(Capability::ManageCompanies)?;
  state.engine.delete_company(id, params.cascade, &actor).await?;
  Ok(StatusCode::NO_CONTENT)
}
