//! Handlers for follow-up questions and their answers.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/audits/:id/criteria/:criterion_id/questions` | Drafted by the analysis service |
//! | `GET`  | `/audits/:id/questions` | Optional `?criterion_id`, `unanswered` |
//! | `GET`  | `/questions/:id` | |
//! | `GET`  | `/questions/:id/answers` | |
//! | `POST` | `/questions/:id/answers` | Body: [`AnswerBody`] |

use assay_core::{
  question::{Answer, Question},
  store::QuestionQuery,
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

/// `POST /audits/:id/criteria/:criterion_id/questions`
pub async fn generate(
  State(state): State<AppState>,
  principal: Principal,
  Path((id, criterion_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
  let actor = principal.require(Capability::Score)?;
  let questions = state
    .engine
    .generate_questions(id, criterion_id, &actor)
    .await?;
  Ok((StatusCode::CREATED, Json(questions)))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub criterion_id: Option<Uuid>,
  #[serde(default)]
  pub unanswered:   bool,
}

/// `GET /audits/:id/questions`
pub async fn list(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Question>>, ApiError> {
  principal.require(Capability::View)?;
  let query = QuestionQuery {
    audit_id:        id,
    criterion_id:    params.criterion_id,
    unanswered_only: params.unanswered,
  };
  Ok(Json(state.engine.list_questions(id, query).await?))
}

/// `GET /questions/:id`
pub async fn get_one(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<Question>, ApiError> {
  principal.require(Capability::View)?;
  Ok(Json(state.engine.get_question(id).await?))
}

/// `GET /questions/:id/answers`
pub async fn list_answers(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<Answer>>, ApiError> {
  principal.require(Capability::View)?;
  Ok(Json(state.engine.list_answers(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct AnswerBody {
  pub text: String,
}

/// `POST /questions/:id/answers`
///
/// Anyone who may upload evidence may answer.
pub async fn answer(
  State(state): State<AppState>,
  principal: Principal,
  Path(id): Path<Uuid>,
  Json(body): Json<AnswerBody>,
) -> Result<impl IntoResponse, ApiError> {
  let actor = principal.require(Capability::UploadEvidence)?;
  let answer = state.engine.answer_question(id, body.text, &actor).await?;
  Ok((StatusCode::CREATED, Json(answer)))
}
