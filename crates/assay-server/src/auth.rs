//! HTTP Basic-auth extractor and role capabilities.

use std::fmt;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use assay_core::Actor;
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, request::Parts};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};

use crate::{AppState, error::ApiError};

// ─── Roles ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  GlobalAdmin,
  Auditor,
  OrgLead,
  OrgUser,
  Observer,
}

/// What a request may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
  View,
  ManageCompanies,
  /// Import and edit the shared base taxonomy.
  ManageTaxonomy,
  /// Create audits, drive the lifecycle, select and customise criteria.
  ManageAudits,
  UploadEvidence,
  ManageLinks,
  Score,
}

impl fmt::Display for Capability {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::View => "view",
      Self::ManageCompanies => "manage_companies",
      Self::ManageTaxonomy => "manage_taxonomy",
      Self::ManageAudits => "manage_audits",
      Self::UploadEvidence => "upload_evidence",
      Self::ManageLinks => "manage_links",
      Self::Score => "score",
    })
  }
}

impl Role {
  pub fn allows(self, capability: Capability) -> bool {
    use Capability::*;
    match self {
      Role::GlobalAdmin => true,
      Role::Auditor => !matches!(capability, ManageCompanies | ManageTaxonomy),
      Role::OrgLead | Role::OrgUser => matches!(capability, View | UploadEvidence),
      Role::Observer => capability == View,
    }
  }
}

// ─── Users ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
  pub username:      String,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  pub password_hash: String,
  pub role:          Role,
}

/// Credentials accepted by this server instance.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
  pub users: Vec<UserConfig>,
}

impl AuthConfig {
  pub fn new(users: Vec<UserConfig>) -> Self { Self { users } }

  fn user(&self, username: &str) -> Option<&UserConfig> {
    self.users.iter().find(|u| u.username == username)
  }
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct Principal {
  pub username: String,
  pub role:     Role,
}

impl Principal {
  /// The actor to record for a mutation, if the role allows `capability`.
  pub fn require(&self, capability: Capability) -> Result<Actor, ApiError> {
    if !self.role.allows(capability) {
      tracing::warn!(user = %self.username, %capability, "capability denied");
      return Err(ApiError::Forbidden(capability));
    }
    Ok(Actor::new(self.username.clone()))
  }
}

/// Verify credentials from headers and resolve the caller.
pub fn verify_auth(headers: &HeaderMap, config: &AuthConfig) -> Result<Principal, ApiError> {
  let header_val = headers
    .get(axum::http::header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(ApiError::Unauthorized)?;

  let encoded = header_val
    .strip_prefix("Basic ")
    .ok_or(ApiError::Unauthorized)?;

  let decoded = B64.decode(encoded).map_err(|_| ApiError::Unauthorized)?;
  let creds   = std::str::from_utf8(&decoded).map_err(|_| ApiError::Unauthorized)?;

  let (username, password) = creds.split_once(':').ok_or(ApiError::Unauthorized)?;
  let user = config.user(username).ok_or(ApiError::Unauthorized)?;

  let parsed_hash = PasswordHash::new(&user.password_hash)
    .map_err(|_| ApiError::Unauthorized)?;

  Argon2::default()
    .verify_password(password.as_bytes(), &parsed_hash)
    .map_err(|_| ApiError::Unauthorized)?;

  Ok(Principal {
    username: user.username.clone(),
    role:     user.role,
  })
}

impl FromRequestParts<AppState> for Principal {
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState,
  ) -> Result<Self, Self::Rejection> {
    verify_auth(&parts.headers, &state.auth)
  }
}

#[cfg(test)]
mod tests {
  use axum::http::header;

  use super::*;

  fn config(password: &str) -> AuthConfig {
    use argon2::{PasswordHasher, password_hash::SaltString};
    use rand_core::OsRng;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .unwrap()
      .to_string();
    AuthConfig::new(vec![UserConfig {
      username:      "lead".to_string(),
      password_hash: hash,
      role:          Role::OrgLead,
    }])
  }

  fn headers(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, value.parse().unwrap());
    headers
  }

  fn basic(user: &str, pass: &str) -> String {
    let encoded = B64.encode(format!("{user}:{pass}"));
    format!("Basic {encoded}")
  }

  #[test]
  fn correct_credentials_resolve_role() {
    let config = config("secret");
    let principal = verify_auth(&headers(&basic("lead", "secret")), &config).unwrap();
    assert_eq!(principal.role, Role::OrgLead);
    assert_eq!(principal.require(Capability::UploadEvidence).unwrap().as_str(), "lead");
    assert!(matches!(
      principal.require(Capability::Score),
      Err(ApiError::Forbidden(Capability::Score))
    ));
  }

  #[test]
  fn wrong_password_or_user() {
    let config = config("secret");
    assert!(matches!(
      verify_auth(&headers(&basic("lead", "wrong")), &config),
      Err(ApiError::Unauthorized)
    ));
    assert!(matches!(
      verify_auth(&headers(&basic("nobody", "secret")), &config),
      Err(ApiError::Unauthorized)
    ));
  }

  #[test]
  fn missing_or_malformed_header() {
    let config = config("secret");
    assert!(matches!(verify_auth(&HeaderMap::new(), &config), Err(ApiError::Unauthorized)));
    assert!(matches!(
      verify_auth(&headers("Basic !!!not-base64!!!"), &config),
      Err(ApiError::Unauthorized)
    ));
  }

  #[test]
  fn role_capabilities() {
    assert!(Role::GlobalAdmin.allows(Capability::ManageTaxonomy));
    assert!(Role::Auditor.allows(Capability::Score));
    assert!(!Role::Auditor.allows(Capability::ManageCompanies));
    assert!(Role::OrgUser.allows(Capability::UploadEvidence));
    assert!(!Role::OrgUser.allows(Capability::ManageLinks));
    assert!(Role::Observer.allows(Capability::View));
    assert!(!Role::Observer.allows(Capability::UploadEvidence));
  }
}
