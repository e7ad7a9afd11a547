//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Every error leaves the server as
//! `{"error": {"code": "...", "message": "...", "retryable": bool, ...}}`.

use assay_core::Error as CoreError;
use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::auth::Capability;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("unauthorized")]
  Unauthorized,

  #[error("missing capability: {0}")]
  Forbidden(Capability),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error(transparent)]
  Core(#[from] CoreError),
}

/// The `error` object of a failed response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
  pub code:      &'static str,
  pub message:   String,
  pub retryable: bool,
  /// Variant-specific payload such as validation problems.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details:   Option<Value>,
}

impl ErrorBody {
  pub fn from_core(e: &CoreError) -> Self {
    let details = match e {
      CoreError::Validation(problems) => Some(json!({ "problems": problems })),
      CoreError::IncompleteAssessment { unassessed, .. } => {
        Some(json!({ "unassessed": unassessed }))
      }
      CoreError::InvalidTransition { from, to } => {
        Some(json!({ "from": from, "to": to }))
      }
      _ => None,
    };
    Self {
      code: core_code(e),
      message: e.to_string(),
      retryable: e.is_retryable(),
      details,
    }
  }
}

fn core_code(e: &CoreError) -> &'static str {
  match e {
    CoreError::Validation(_) => "validation",
    CoreError::NotFound { .. } => "not_found",
    CoreError::UnsupportedFormat(_) => "unsupported_format",
    CoreError::AnalysisUnavailable(_) => "analysis_unavailable",
    CoreError::Timeout => "timeout",
    CoreError::IncompleteAssessment { .. } => "incomplete_assessment",
    CoreError::Conflict(_) => "conflict",
    CoreError::InvalidTransition { .. } => "invalid_transition",
    CoreError::AuditLocked { .. } => "audit_locked",
    CoreError::Store(_) => "store",
    CoreError::Serialization(_) => "serialization",
  }
}

fn core_status(e: &CoreError) -> StatusCode {
  match e {
    CoreError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
    CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
    CoreError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
    CoreError::AnalysisUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    CoreError::Timeout => StatusCode::GATEWAY_TIMEOUT,
    CoreError::IncompleteAssessment { .. }
    | CoreError::Conflict(_)
    | CoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
    CoreError::AuditLocked { .. } => StatusCode::LOCKED,
    CoreError::Store(_) | CoreError::Serialization(_) => {
      StatusCode::INTERNAL_SERVER_ERROR
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, body) = match &self {
      ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, ErrorBody {
        code:      "unauthorized",
        message:   self.to_string(),
        retryable: false,
        details:   None,
      }),
      ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, ErrorBody {
        code:      "forbidden",
        message:   self.to_string(),
        retryable: false,
        details:   None,
      }),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, ErrorBody {
        code:      "bad_request",
        message:   m.clone(),
        retryable: false,
        details:   None,
      }),
      ApiError::Core(e) => {
        if matches!(e, CoreError::Store(_) | CoreError::Serialization(_)) {
          tracing::error!(error = %e, "internal error");
        }
        (core_status(e), ErrorBody::from_core(e))
      }
    };

    let mut res = (status, Json(json!({ "error": body }))).into_response();
    if status == StatusCode::UNAUTHORIZED {
      res.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"assay\""),
      );
    }
    res
  }
}

#[cfg(test)]
mod tests {
  use uuid::Uuid;

  use super::*;

  #[test]
  fn incomplete_assessment_lists_missing_criteria() {
    let id = Uuid::new_v4();
    let body = ErrorBody::from_core(&CoreError::IncompleteAssessment {
      audit_id:   Uuid::nil(),
      unassessed: vec![id],
    });
    assert_eq!(body.code, "incomplete_assessment");
    assert!(!body.retryable);
    assert_eq!(body.details, Some(json!({ "unassessed": [id] })));
  }

  #[test]
  fn statuses_follow_error_kind() {
    assert_eq!(core_status(&CoreError::Timeout), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(
      core_status(&CoreError::not_found("audit", Uuid::nil())),
      StatusCode::NOT_FOUND
    );
    assert_eq!(
      core_status(&CoreError::invalid("empty")),
      StatusCode::UNPROCESSABLE_ENTITY
    );
  }
}
