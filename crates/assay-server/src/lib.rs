//! JSON API for the Assay maturity assessment engine.
//!
//! A thin axum layer: handlers authenticate the caller, check the role's
//! capability, call one [`Engine`] operation and serialise the result. All
//! business rules live in `assay-engine`.

pub mod auth;
pub mod error;
pub mod handlers;

use std::{path::PathBuf, sync::Arc};

use assay_engine::{Engine, EngineConfig};
use assay_providers::{AnalysisConfig, AnyAnalysis, FsBlobStore};
use assay_store_sqlite::SqliteStore;
use axum::{
  Router,
  extract::DefaultBodyLimit,
  routing::{get, post, put},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use auth::{AuthConfig, UserConfig};
use handlers::{assessments, audits, companies, evidence, links, questions, taxonomy};

/// The engine as the server runs it.
pub type AppEngine = Engine<SqliteStore, FsBlobStore, AnyAnalysis<FsBlobStore>>;

// ─── Configuration ────────────────────────────────────────────────────────────

fn default_host() -> String { "127.0.0.1".to_string() }

fn default_port() -> u16 { 8080 }

fn default_max_body_bytes() -> usize { 256 * 1024 * 1024 }

/// Runtime server configuration, deserialised from `config.toml`.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:           String,
  #[serde(default = "default_port")]
  pub port:           u16,
  pub store_path:     PathBuf,
  pub blob_dir:       PathBuf,
  /// Upper bound on a request body. Batch uploads are base64 inside JSON,
  /// so this sits well above `engine.max_artifact_bytes`.
  #[serde(default = "default_max_body_bytes")]
  pub max_body_bytes: usize,
  #[serde(default)]
  pub users:          Vec<UserConfig>,
  #[serde(default)]
  pub engine:         EngineConfig,
  #[serde(default)]
  pub analysis:       AnalysisConfig,
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
#[derive(Clone)]
pub struct AppState {
  pub engine:         Arc<AppEngine>,
  pub auth:           Arc<AuthConfig>,
  pub max_body_bytes: usize,
}

impl AppState {
  pub fn new(engine: AppEngine, auth: AuthConfig) -> Self {
    Self {
      engine:         Arc::new(engine),
      auth:           Arc::new(auth),
      max_body_bytes: default_max_body_bytes(),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the API router. Everything is mounted under `/api`.
pub fn router(state: AppState) -> Router {
  let limit = state.max_body_bytes;
  let api = Router::new()
    // Companies
    .route("/companies", get(companies::list).post(companies::create))
    .route("/companies/{id}", get(companies::get_one).delete(companies::delete))
    // Audits and lifecycle
    .route("/audits", get(audits::list).post(audits::create))
    .route("/audits/{id}", get(audits::get_one).delete(audits::delete))
    .route("/audits/{id}/settings", put(audits::update_settings))
    .route("/audits/{id}/selection", get(audits::get_selection).put(audits::select))
    .route("/audits/{id}/lifecycle/{transition}", post(audits::transition))
    // Taxonomy
    .route("/taxonomy", get(taxonomy::list_base).post(taxonomy::import))
    .route("/taxonomy/validation", get(taxonomy::validate_base))
    .route("/criteria/{id}", get(taxonomy::get_one))
    .route("/audits/{id}/criteria", get(taxonomy::list_audit).post(taxonomy::add_custom))
    .route(
      "/audits/{id}/criteria/{criterion_id}",
      put(taxonomy::update_custom).delete(taxonomy::delete_custom),
    )
    .route("/audits/{id}/criteria/{criterion_id}/customise", post(taxonomy::customise))
    .route("/audits/{id}/validation", get(taxonomy::validate_audit))
    // Evidence
    .route("/audits/{id}/evidence", get(evidence::list).post(evidence::upload))
    .route("/evidence/{id}", get(evidence::get_one).delete(evidence::delete))
    .route("/evidence/{id}/resubmit", post(evidence::resubmit))
    .route("/evidence/{id}/suggestions", post(links::suggest))
    .route("/evidence/{id}/links", post(links::link))
    // Links
    .route("/audits/{id}/links", get(links::list))
    .route("/links/{id}", get(links::get_one).delete(links::reject))
    .route("/links/{id}/confirm", post(links::confirm))
    // Assessments
    .route("/audits/{id}/assessments", get(assessments::list).post(assessments::compute_all))
    .route("/audits/{id}/assessments/{criterion_id}", get(assessments::get_one))
    .route(
      "/audits/{id}/assessments/{criterion_id}/compute",
      post(assessments::compute),
    )
    .route(
      "/audits/{id}/assessments/{criterion_id}/override",
      put(assessments::set_override).delete(assessments::clear_override),
    )
    // Questions
    .route(
      "/audits/{id}/criteria/{criterion_id}/questions",
      post(questions::generate),
    )
    .route("/audits/{id}/questions", get(questions::list))
    .route("/questions/{id}", get(questions::get_one))
    .route(
      "/questions/{id}/answers",
      get(questions::list_answers).post(questions::answer),
    );

  Router::new()
    .nest("/api", api)
    .layer(DefaultBodyLimit::max(limit))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
