//! assay-server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), opens the
//! SQLite store and blob directory, and serves the JSON API over HTTP.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for a `[[users]]` entry:
//!
//! ```
//! cargo run -p assay-server -- --hash-password
//! ```
//!
//! # Seeding the base taxonomy
//!
//! ```
//! cargo run -p assay-server -- --import-taxonomy criteria.json
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use assay_core::{Actor, taxonomy::SectionDocument};
use assay_engine::Engine;
use assay_providers::{AnyAnalysis, FsBlobStore};
use assay_server::{AppEngine, AppState, ServerConfig, auth::AuthConfig};
use assay_store_sqlite::SqliteStore;
use clap::Parser;
use rand_core::OsRng;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Assay maturity assessment server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,

  /// Import a criteria JSON document into the base taxonomy and exit.
  #[arg(long, value_name = "FILE")]
  import_taxonomy: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  if cli.hash_password {
    let password = read_password()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("ASSAY").separator("__"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let engine = build_engine(&server_cfg).await?;

  if let Some(path) = cli.import_taxonomy {
    let raw = std::fs::read_to_string(&path)
      .with_context(|| format!("failed to read {path:?}"))?;
    let sections: Vec<SectionDocument> = serde_json::from_str(&raw)
      .with_context(|| format!("{path:?} is not a criteria document"))?;
    let nodes = engine
      .import_taxonomy(sections, &Actor::system())
      .await
      .context("taxonomy import failed")?;
    println!("imported {} criteria", nodes.len());
    return Ok(());
  }

  if server_cfg.users.is_empty() {
    tracing::warn!("no users configured; every request will be rejected");
  }

  let state = AppState {
    max_body_bytes: server_cfg.max_body_bytes,
    ..AppState::new(engine, AuthConfig::new(server_cfg.users.clone()))
  };

  let app = assay_server::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

async fn build_engine(cfg: &ServerConfig) -> anyhow::Result<AppEngine> {
  let store_path = expand_tilde(&cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let blob_dir = expand_tilde(&cfg.blob_dir);
  let blobs = FsBlobStore::open(&blob_dir)
    .await
    .with_context(|| format!("failed to open blob directory {blob_dir:?}"))?;

  let analysis = AnyAnalysis::from_config(cfg.analysis.clone(), blobs.clone())
    .context("failed to configure the analysis provider")?;
  tracing::info!(provider = analysis.name(), "analysis provider ready");

  Engine::new(store, blobs, analysis, cfg.engine.clone()).context("invalid engine configuration")
}

/// Read a password from stdin.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  let stdin = io::stdin();
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  stdin.lock().read_line(&mut line)?;
  Ok(
    line
      .trim_end_matches('\n')
      .trim_end_matches('\r')
      .to_string(),
  )
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
