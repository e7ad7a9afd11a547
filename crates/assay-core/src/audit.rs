//! Companies, audits and the audit lifecycle.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{
  Result,
  criterion::MaturityLevel,
  error::Error,
  taxonomy::Taxonomy,
};

// ─── Company ─────────────────────────────────────────────────────────────────

/// An organisation being audited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
  pub company_id:  Uuid,
  pub name:        String,
  pub description: Option<String>,
  pub sector:      Option<String>,
  pub created_at:  DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCompany {
  pub name:        String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub sector:      Option<String>,
}

// ─── Lifecycle ───────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditState {
  Draft,
  CriteriaSelected,
  EvidenceCollection,
  Scoring,
  Finalized,
  Archived,
}

impl AuditState {
  /// Whether the lifecycle allows moving from `self` to `next`.
  ///
  /// Forward moves are one step at a time. `Scoring` may reopen evidence
  /// collection, `Finalized` may return to `Scoring`, and any state but
  /// `Archived` may be archived.
  pub fn can_transition_to(self, next: Self) -> bool {
    use AuditState::*;
    matches!(
      (self, next),
      (Draft, CriteriaSelected)
        | (CriteriaSelected, EvidenceCollection)
        | (EvidenceCollection, Scoring)
        | (Scoring, EvidenceCollection)
        | (Scoring, Finalized)
        | (Finalized, Scoring)
    ) || (next == Archived && self != Archived)
  }

  /// Finalized and archived audits reject every ordinary mutation.
  pub fn is_locked(self) -> bool { matches!(self, Self::Finalized | Self::Archived) }

  pub fn accepts_selection(self) -> bool {
    matches!(self, Self::Draft | Self::CriteriaSelected)
  }

  pub fn accepts_evidence(self) -> bool {
    matches!(self, Self::EvidenceCollection | Self::Scoring)
  }

  pub fn accepts_scoring(self) -> bool { self.accepts_evidence() }
}

// ─── Audit ───────────────────────────────────────────────────────────────────

fn default_true() -> bool { true }

fn default_auto_accept_threshold() -> f32 { 0.85 }

/// Per-audit knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuditSettings {
  /// Refuse to finalize while any in-scope criterion is unassessed.
  #[serde(default = "default_true")]
  pub require_full_coverage: bool,
  /// Store high-confidence suggestions as confirmed links.
  #[serde(default)]
  pub auto_accept:           bool,
  #[serde(default = "default_auto_accept_threshold")]
  pub auto_accept_threshold: f32,
}

impl Default for AuditSettings {
  fn default() -> Self {
    Self {
      require_full_coverage: true,
      auto_accept:           false,
      auto_accept_threshold: default_auto_accept_threshold(),
    }
  }
}

impl AuditSettings {
  pub fn check(&self) -> Result<()> {
    if !(0.0..=1.0).contains(&self.auto_accept_threshold) {
      return Err(Error::invalid(format!(
        "auto_accept_threshold must lie in [0, 1], got {}",
        self.auto_accept_threshold
      )));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audit {
  pub audit_id:     Uuid,
  pub company_id:   Uuid,
  pub name:         String,
  pub description:  Option<String>,
  pub state:        AuditState,
  pub settings:     AuditSettings,
  /// Bumped on every successful update; stale writers get a conflict.
  pub version:      u64,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
  pub finalized_at: Option<DateTime<Utc>>,
}

impl Audit {
  /// Fail with [`Error::AuditLocked`] if the audit no longer takes changes.
  pub fn ensure_unlocked(&self) -> Result<()> {
    if self.state.is_locked() {
      return Err(Error::AuditLocked {
        audit_id: self.audit_id,
        state:    self.state,
      });
    }
    Ok(())
  }

  /// Move to `next`, stamping timestamps. Does not persist.
  pub fn transition(&mut self, next: AuditState, now: DateTime<Utc>) -> Result<()> {
    if !self.state.can_transition_to(next) {
      return Err(Error::InvalidTransition {
        from: self.state,
        to:   next,
      });
    }
    self.state = next;
    self.updated_at = now;
    match next {
      AuditState::Finalized => self.finalized_at = Some(now),
      AuditState::Scoring => self.finalized_at = None,
      _ => {}
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAudit {
  pub company_id:  Uuid,
  pub name:        String,
  #[serde(default)]
  pub description: Option<String>,
  /// Engine defaults apply when absent.
  #[serde(default)]
  pub settings:    Option<AuditSettings>,
}

// ─── Selection ───────────────────────────────────────────────────────────────

/// One criterion chosen for an audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
  pub criterion_id:   Uuid,
  /// The level the organisation aims for, if recorded.
  #[serde(default)]
  pub expected_level: Option<MaturityLevel>,
}

/// The criteria an audit scores: every selected node plus its ancestors.
pub fn in_scope(taxonomy: &Taxonomy, selection: &[Selection]) -> Result<HashSet<Uuid>> {
  let mut scope = HashSet::new();
  for s in selection {
    for node in taxonomy.ancestors(s.criterion_id)? {
      scope.insert(node.criterion_id);
    }
  }
  Ok(scope)
}
