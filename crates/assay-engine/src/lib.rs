//! The Assay maturity assessment engine.
//!
//! [`Engine`] ties the domain rules in `assay-core` to three collaborators: an
//! [`AuditStore`] for persistence, a [`BlobStore`] for raw uploads and an
//! [`AnalysisService`] for the AI capability. It owns the concurrency story:
//! mutations of one audit are serialised through [`AuditLocks`], external
//! calls go through the [`AnalysisGate`] and never run while an audit lock is
//! held, and audit writes carry an optimistic version check.
//!
//! Operations are grouped by component:
//! - [`audits`]: companies, audits, selection and the lifecycle controller
//! - [`criteria`]: taxonomy import, validation and per-audit customisation
//! - [`classifier`]: evidence upload and extraction
//! - [`linker`]: evidence-to-criterion links
//! - [`scoring`]: maturity aggregation and human overrides
//! - [`questions`]: follow-up questions and their answers

pub mod audits;
pub mod classifier;
pub mod config;
pub mod criteria;
pub mod extract;
pub mod gate;
pub mod linker;
pub mod locks;
pub mod questions;
pub mod scoring;

#[cfg(test)]
mod testing;

use std::collections::HashSet;

use assay_core::{
  Actor, Error, Result,
  analysis::AnalysisService,
  assessment::MaturityAssessment,
  audit::{Audit, in_scope},
  blob::BlobStore,
  store::{AuditStore, CriteriaScope},
  taxonomy::Taxonomy,
};
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

pub use config::EngineConfig;
pub use gate::AnalysisGate;
pub use locks::AuditLocks;

pub(crate) fn version_conflict(audit_id: Uuid, expected: u64) -> Error {
  warn!(%audit_id, expected, "audit version conflict");
  Error::Conflict(format!(
    "audit {audit_id} changed since version {expected}; reload and retry"
  ))
}

pub(crate) fn check_in_scope(
  audit_id: Uuid,
  taxonomy: &Taxonomy,
  scope: &HashSet<Uuid>,
  criterion_id: Uuid,
) -> Result<()> {
  taxonomy.get_node(criterion_id)?;
  if !scope.contains(&criterion_id) {
    return Err(Error::invalid(format!(
      "criterion {criterion_id} is not in scope for audit {audit_id}"
    )));
  }
  Ok(())
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct Engine<S, B, A> {
  store:    S,
  blobs:    B,
  analysis: A,
  config:   EngineConfig,
  locks:    AuditLocks,
  gate:     AnalysisGate,
}

impl<S, B, A> Engine<S, B, A>
where
  S: AuditStore,
  B: BlobStore,
  A: AnalysisService,
{
  pub fn new(store: S, blobs: B, analysis: A, config: EngineConfig) -> Result<Self> {
    config.check()?;
    let gate = AnalysisGate::new(config.max_concurrent_analysis, config.analysis_timeout());
    Ok(Self {
      store,
      blobs,
      analysis,
      config,
      locks: AuditLocks::default(),
      gate,
    })
  }

  pub fn config(&self) -> &EngineConfig { &self.config }

  pub fn store(&self) -> &S { &self.store }

  // ── Shared helpers ────────────────────────────────────────────────────

  pub(crate) async fn load_audit(&self, audit_id: Uuid) -> Result<Audit> {
    self
      .store
      .get_audit(audit_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::not_found("audit", audit_id))
  }

  /// Persist `audit`, failing with a conflict if someone else wrote it first.
  pub(crate) async fn save_audit(&self, audit: Audit) -> Result<Audit> {
    let audit_id = audit.audit_id;
    let expected = audit.version;
    match self.store.update_audit(audit).await.map_err(Error::store)? {
      Some(saved) => Ok(saved),
      None => Err(version_conflict(audit_id, expected)),
    }
  }

  /// Base taxonomy plus the audit's custom criteria.
  pub(crate) async fn audit_taxonomy(&self, audit_id: Uuid) -> Result<Taxonomy> {
    let nodes = self
      .store
      .list_criteria(CriteriaScope::Audit(audit_id))
      .await
      .map_err(Error::store)?;
    Ok(Taxonomy::new(nodes))
  }

  pub(crate) async fn scope_of(
    &self,
    audit_id: Uuid,
    taxonomy: &Taxonomy,
  ) -> Result<HashSet<Uuid>> {
    let selection = self
      .store
      .get_selection(audit_id)
      .await
      .map_err(Error::store)?;
    in_scope(taxonomy, &selection)
  }

  /// Fails unless `criterion_id` belongs to the audit's taxonomy and is in
  /// scope.
  pub(crate) async fn ensure_in_scope(&self, audit_id: Uuid, criterion_id: Uuid) -> Result<()> {
    let taxonomy = self.audit_taxonomy(audit_id).await?;
    let scope = self.scope_of(audit_id, &taxonomy).await?;
    check_in_scope(audit_id, &taxonomy, &scope, criterion_id)
  }

  /// Raise `needs_review` on the criterion's assessment if it is overridden.
  pub(crate) async fn flag_review(
    &self,
    audit_id: Uuid,
    criterion_id: Uuid,
    actor: &Actor,
  ) -> Result<()> {
    let existing = self
      .store
      .get_assessment(audit_id, criterion_id)
      .await
      .map_err(Error::store)?;
    if let Some(mut assessment) = existing
      && assessment.flag_for_review()
    {
      assessment.modified_by = actor.clone();
      assessment.modified_at = Utc::now();
      tracing::info!(%audit_id, %criterion_id, "override flagged for review");
      self
        .store
        .put_assessments(vec![assessment])
        .await
        .map_err(Error::store)?;
    }
    Ok(())
  }

  pub(crate) async fn existing_assessment(
    &self,
    audit_id: Uuid,
    criterion_id: Uuid,
  ) -> Result<Option<MaturityAssessment>> {
    self
      .store
      .get_assessment(audit_id, criterion_id)
      .await
      .map_err(Error::store)
  }
}
