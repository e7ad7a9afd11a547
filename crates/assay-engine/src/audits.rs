//! Companies, audits, criteria selection and the audit lifecycle controller.

use std::collections::HashSet;

use assay_core::{
  Actor, Error, Result,
  analysis::AnalysisService,
  assessment::MaturityAssessment,
  audit::{Audit, AuditSettings, AuditState, Company, NewAudit, NewCompany, Selection},
  blob::BlobStore,
  criterion::Level,
  error::{Problem, Problems},
  evidence::ExtractionStatus,
  store::AuditStore,
};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{Engine, version_conflict};

fn require_name(name: &str, what: &str) -> Result<()> {
  if name.trim().is_empty() {
    return Err(Error::invalid(format!("{what} name must not be empty")));
  }
  Ok(())
}

impl<S, B, A> Engine<S, B, A>
where
  S: AuditStore,
  B: BlobStore,
  A: AnalysisService,
{
  // ── Companies ─────────────────────────────────────────────────────────

  #[instrument(skip(self, input), fields(name = %input.name))]
  pub async fn create_company(&self, input: NewCompany, actor: &Actor) -> Result<Company> {
    require_name(&input.name, "company")?;
    let company = self.store.add_company(input).await.map_err(Error::store)?;
    info!(company_id = %company.company_id, %actor, "company created");
    Ok(company)
  }

  pub async fn get_company(&self, company_id: Uuid) -> Result<Company> {
    self
      .store
      .get_company(company_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::not_found("company", company_id))
  }

  pub async fn list_companies(&self) -> Result<Vec<Company>> {
    self.store.list_companies().await.map_err(Error::store)
  }

  /// Delete a company. If it still owns audits the caller must pass
  /// `cascade`, in which case the audits go too.
  #[instrument(skip(self))]
  pub async fn delete_company(
    &self,
    company_id: Uuid,
    cascade: bool,
    actor: &Actor,
  ) -> Result<()> {
    self.get_company(company_id).await?;
    let audits = self
      .store
      .list_audits(Some(company_id))
      .await
      .map_err(Error::store)?;
    if !audits.is_empty() && !cascade {
      return Err(Error::Conflict(format!(
        "company {company_id} still owns {} audit(s); confirm cascading deletion",
        audits.len()
      )));
    }
    for audit in audits {
      self.delete_audit(audit.audit_id, actor).await?;
    }
    self
      .store
      .delete_company(company_id)
      .await
      .map_err(Error::store)?;
    info!(%company_id, %actor, "company deleted");
    Ok(())
  }

  // ── Audits ────────────────────────────────────────────────────────────

  #[instrument(skip(self, input), fields(company_id = %input.company_id))]
  pub async fn create_audit(&self, mut input: NewAudit, actor: &Actor) -> Result<Audit> {
    require_name(&input.name, "audit")?;
    self.get_company(input.company_id).await?;
    let settings = input
      .settings
      .unwrap_or_else(|| self.config.default_audit_settings());
    settings.check()?;
    input.settings = Some(settings);

    let audit = self.store.add_audit(input).await.map_err(Error::store)?;
    info!(audit_id = %audit.audit_id, %actor, "audit created");
    Ok(audit)
  }

  pub async fn get_audit(&self, audit_id: Uuid) -> Result<Audit> {
    self.load_audit(audit_id).await
  }

  pub async fn list_audits(&self, company_id: Option<Uuid>) -> Result<Vec<Audit>> {
    self.store.list_audits(company_id).await.map_err(Error::store)
  }

  /// Replace an audit's settings. `expected_version`, when given, must match
  /// the stored version.
  #[instrument(skip(self))]
  pub async fn update_settings(
    &self,
    audit_id: Uuid,
    settings: AuditSettings,
    expected_version: Option<u64>,
    actor: &Actor,
  ) -> Result<Audit> {
    settings.check()?;
    let _guard = self.locks.lock(audit_id).await;
    let mut audit = self.load_audit(audit_id).await?;
    audit.ensure_unlocked()?;
    if let Some(expected) = expected_version {
      audit.version = expected;
    }
    audit.settings = settings;
    audit.updated_at = Utc::now();
    let saved = self.save_audit(audit).await?;
    info!(%audit_id, %actor, version = saved.version, "audit settings updated");
    Ok(saved)
  }

  /// Delete an audit with everything scoped to it. Blobs no other evidence
  /// refers to are removed as well.
  #[instrument(skip(self))]
  pub async fn delete_audit(&self, audit_id: Uuid, actor: &Actor) -> Result<()> {
    let guard = self.locks.lock(audit_id).await;
    self.load_audit(audit_id).await?;
    let evidence = self
      .store
      .list_evidence(audit_id)
      .await
      .map_err(Error::store)?;
    self
      .store
      .delete_audit(audit_id)
      .await
      .map_err(Error::store)?;

    let mut seen = HashSet::new();
    for item in evidence {
      if seen.insert(item.content_hash.clone()) {
        self.release_blob(&item.content_hash, &item.artifact).await;
      }
    }
    drop(guard);
    self.locks.forget(audit_id).await;
    info!(%audit_id, %actor, "audit deleted");
    Ok(())
  }

  // ── Selection ─────────────────────────────────────────────────────────

  /// Choose the criteria the audit covers. Only allowed before evidence
  /// collection starts; moves a draft audit to `criteria_selected`.
  ///
  /// Every in-scope criterion (the selection plus its ancestors) must have
  /// complete maturity text.
  #[instrument(skip(self, selection), fields(count = selection.len()))]
  pub async fn select_criteria(
    &self,
    audit_id: Uuid,
    selection: Vec<Selection>,
    actor: &Actor,
  ) -> Result<Audit> {
    let _guard = self.locks.lock(audit_id).await;
    let mut audit = self.load_audit(audit_id).await?;
    audit.ensure_unlocked()?;
    if !audit.state.accepts_selection() {
      return Err(Error::InvalidTransition {
        from: audit.state,
        to:   AuditState::CriteriaSelected,
      });
    }
    if selection.is_empty() {
      return Err(Error::invalid("select at least one criterion"));
    }

    let taxonomy = self.audit_taxonomy(audit_id).await?;
    let mut seen = HashSet::new();
    let mut deduped = Vec::with_capacity(selection.len());
    for s in selection {
      taxonomy.get_node(s.criterion_id)?;
      if seen.insert(s.criterion_id) {
        deduped.push(s);
      }
    }

    let scope = assay_core::audit::in_scope(&taxonomy, &deduped)?;
    let mut problems = Vec::new();
    for id in taxonomy.preorder() {
      if !scope.contains(&id) {
        continue;
      }
      let node = taxonomy.get_node(id)?;
      for level in node.maturity.missing() {
        problems.push(Problem::MissingMaturityText {
          criterion_id: id,
          level,
        });
      }
    }
    if !problems.is_empty() {
      return Err(Error::Validation(Problems(problems)));
    }

    self
      .store
      .set_selection(audit_id, deduped)
      .await
      .map_err(Error::store)?;

    if audit.state == AuditState::Draft {
      audit.transition(AuditState::CriteriaSelected, Utc::now())?;
      audit = self.save_audit(audit).await?;
    }
    info!(%audit_id, %actor, in_scope = scope.len(), "criteria selected");
    Ok(audit)
  }

  pub async fn get_selection(&self, audit_id: Uuid) -> Result<Vec<Selection>> {
    self.load_audit(audit_id).await?;
    self
      .store
      .get_selection(audit_id)
      .await
      .map_err(Error::store)
  }

  // ── Lifecycle ─────────────────────────────────────────────────────────

  async fn move_to(&self, audit_id: Uuid, next: AuditState, actor: &Actor) -> Result<Audit> {
    let _guard = self.locks.lock(audit_id).await;
    let mut audit = self.load_audit(audit_id).await?;
    let from = audit.state;
    audit.transition(next, Utc::now())?;
    let saved = self.save_audit(audit).await?;
    info!(%audit_id, %actor, %from, to = %next, "audit transition");
    Ok(saved)
  }

  /// `criteria_selected → evidence_collection`.
  #[instrument(skip(self))]
  pub async fn start_evidence_collection(&self, audit_id: Uuid, actor: &Actor) -> Result<Audit> {
    self.move_to(audit_id, AuditState::EvidenceCollection, actor).await
  }

  /// `evidence_collection → scoring`.
  #[instrument(skip(self))]
  pub async fn start_scoring(&self, audit_id: Uuid, actor: &Actor) -> Result<Audit> {
    self.move_to(audit_id, AuditState::Scoring, actor).await
  }

  /// `scoring → evidence_collection`.
  #[instrument(skip(self))]
  pub async fn reopen(&self, audit_id: Uuid, actor: &Actor) -> Result<Audit> {
    let audit = self.load_audit(audit_id).await?;
    if audit.state != AuditState::Scoring {
      return Err(Error::InvalidTransition {
        from: audit.state,
        to:   AuditState::EvidenceCollection,
      });
    }
    self.move_to(audit_id, AuditState::EvidenceCollection, actor).await
  }

  /// `scoring → finalized`, locking every assessment. Refused with a
  /// conflict while any evidence is still being extracted.
  ///
  /// With `require_full_coverage` set, fails with
  /// [`Error::IncompleteAssessment`] listing the in-scope criteria (in
  /// taxonomy order) whose effective level is still unassessed.
  #[instrument(skip(self))]
  pub async fn finalize(&self, audit_id: Uuid, actor: &Actor) -> Result<Audit> {
    let _guard = self.locks.lock(audit_id).await;
    let mut audit = self.load_audit(audit_id).await?;
    if !audit.state.can_transition_to(AuditState::Finalized) {
      return Err(Error::InvalidTransition {
        from: audit.state,
        to:   AuditState::Finalized,
      });
    }

    let evidence = self
      .store
      .list_evidence(audit_id)
      .await
      .map_err(Error::store)?;
    let in_flight = evidence
      .iter()
      .filter(|e| matches!(e.status, ExtractionStatus::Pending | ExtractionStatus::Processing))
      .count();
    if in_flight > 0 {
      return Err(Error::Conflict(format!(
        "{in_flight} evidence item(s) of audit {audit_id} are still being extracted; \
         wait for them or delete them"
      )));
    }

    let taxonomy = self.audit_taxonomy(audit_id).await?;
    let scope = self.scope_of(audit_id, &taxonomy).await?;
    let assessments = self
      .store
      .list_assessments(audit_id)
      .await
      .map_err(Error::store)?;

    if audit.settings.require_full_coverage {
      let assessed: HashSet<Uuid> = assessments
        .iter()
        .filter(|a| a.effective != Level::Unassessed)
        .map(|a| a.criterion_id)
        .collect();
      let unassessed: Vec<Uuid> = taxonomy
        .preorder()
        .into_iter()
        .filter(|id| scope.contains(id) && !assessed.contains(id))
        .collect();
      if !unassessed.is_empty() {
        warn!(%audit_id, missing = unassessed.len(), "finalize refused");
        return Err(Error::IncompleteAssessment {
          audit_id,
          unassessed,
        });
      }
    }

    let now = Utc::now();
    audit.transition(AuditState::Finalized, now)?;
    let saved = self.save_with_locks(audit, assessments, true, actor, now).await?;
    info!(%audit_id, %actor, "audit finalized");
    Ok(saved)
  }

  /// `finalized → scoring`, unlocking assessments.
  #[instrument(skip(self))]
  pub async fn unfinalize(&self, audit_id: Uuid, actor: &Actor) -> Result<Audit> {
    let _guard = self.locks.lock(audit_id).await;
    let mut audit = self.load_audit(audit_id).await?;
    if audit.state != AuditState::Finalized {
      return Err(Error::InvalidTransition {
        from: audit.state,
        to:   AuditState::Scoring,
      });
    }
    let assessments = self
      .store
      .list_assessments(audit_id)
      .await
      .map_err(Error::store)?;
    let now = Utc::now();
    audit.transition(AuditState::Scoring, now)?;
    let saved = self.save_with_locks(audit, assessments, false, actor, now).await?;
    info!(%audit_id, %actor, "audit unfinalized");
    Ok(saved)
  }

  /// Any non-archived state → `archived`. Terminal.
  #[instrument(skip(self))]
  pub async fn archive(&self, audit_id: Uuid, actor: &Actor) -> Result<Audit> {
    self.move_to(audit_id, AuditState::Archived, actor).await
  }

  /// Save the audit and set every assessment's `locked` flag to `locked`
  /// in one store transaction. A version conflict writes nothing.
  async fn save_with_locks(
    &self,
    audit: Audit,
    assessments: Vec<MaturityAssessment>,
    locked: bool,
    actor: &Actor,
    now: DateTime<Utc>,
  ) -> Result<Audit> {
    let changed: Vec<MaturityAssessment> = assessments
      .into_iter()
      .filter(|a| a.locked != locked)
      .map(|mut a| {
        a.locked = locked;
        a.modified_by = actor.clone();
        a.modified_at = now;
        a
      })
      .collect();
    let audit_id = audit.audit_id;
    let expected = audit.version;
    match self
      .store
      .update_audit_with_assessments(audit, changed)
      .await
      .map_err(Error::store)?
    {
      Some(saved) => Ok(saved),
      None => Err(version_conflict(audit_id, expected)),
    }
  }
}
