//! The evidence-to-criterion linker.
//!
//! Suggestions come from the analysis service and are never authoritative on
//! their own: they are stored as `suggested` links until a human confirms
//! them, unless the audit opted into auto-acceptance and the suggestion is
//! confident enough.

use std::collections::HashSet;

use assay_core::{
  Actor, Error, Result,
  analysis::AnalysisService,
  blob::BlobStore,
  criterion::MaturityLevel,
  link::{EvidenceLink, LinkOrigin, LinkStatus, NewLink, check_weight, rank_suggestions},
  store::{AuditStore, LinkQuery},
};
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{Engine, check_in_scope};

impl<S, B, A> Engine<S, B, A>
where
  S: AuditStore,
  B: BlobStore,
  A: AnalysisService,
{
  /// Score an extracted evidence item against candidate criteria and store
  /// the relevant ones as links.
  ///
  /// `candidates` defaults to every in-scope criterion; an explicit candidate
  /// outside the audit's scope is a validation error. Criteria that already
  /// have a link to this evidence are skipped. Any analysis failure aborts the
  /// call before anything is stored. Returns the newly stored links, best
  /// first.
  ///
  /// Scoring runs without the audit lock. The lock is taken only to store
  /// the result, after checking that the audit is still open and the evidence
  /// unchanged.
  #[instrument(skip(self, candidates))]
  pub async fn suggest_links(
    &self,
    evidence_id: Uuid,
    candidates: Option<Vec<Uuid>>,
    actor: &Actor,
  ) -> Result<Vec<EvidenceLink>> {
    let item = self.get_evidence(evidence_id).await?;
    let audit_id = item.audit_id;
    self.load_audit(audit_id).await?.ensure_unlocked()?;
    let Some(text) = item.text() else {
      return Err(Error::Conflict(format!(
        "evidence {evidence_id} is {} and has no extracted content",
        item.status
      )));
    };

    let taxonomy = self.audit_taxonomy(audit_id).await?;
    let scope = self.scope_of(audit_id, &taxonomy).await?;
    let candidates = match candidates {
      Some(ids) => {
        for id in &ids {
          check_in_scope(audit_id, &taxonomy, &scope, *id)?;
        }
        ids
      }
      None => taxonomy
        .preorder()
        .into_iter()
        .filter(|id| scope.contains(id))
        .collect(),
    };

    let already = self.linked_criteria(audit_id, evidence_id).await?;
    let mut seen = HashSet::new();
    let pending: Vec<(Uuid, String)> = candidates
      .into_iter()
      .filter(|id| !already.contains(id) && seen.insert(*id))
      .map(|id| -> Result<(Uuid, String)> {
        Ok((id, taxonomy.get_node(id)?.reference_text()))
      })
      .collect::<Result<_>>()?;

    let scored = join_all(pending.iter().map(|(id, reference)| async move {
      let score = self
        .gate
        .run(self.analysis.semantic_score(text, reference))
        .await?;
      Ok::<_, Error>((*id, score))
    }))
    .await
    .into_iter()
    .collect::<Result<Vec<_>>>()?;

    let ranked = rank_suggestions(
      scored,
      &taxonomy.order_index(),
      self.config.relevance_threshold,
    );
    debug!(%evidence_id, candidates = pending.len(), kept = ranked.len(), "links ranked");

    let _guard = self.locks.lock(audit_id).await;
    let audit = self.load_audit(audit_id).await?;
    audit.ensure_unlocked()?;
    if self.get_evidence(evidence_id).await?.content != item.content {
      return Err(Error::Conflict(format!(
        "evidence {evidence_id} was re-extracted while links were scored; retry"
      )));
    }
    let taxonomy = self.audit_taxonomy(audit_id).await?;
    let scope = self.scope_of(audit_id, &taxonomy).await?;
    let already = self.linked_criteria(audit_id, evidence_id).await?;

    let settings = audit.settings;
    let fresh: Vec<NewLink> = ranked
      .into_iter()
      .filter(|s| scope.contains(&s.criterion_id) && !already.contains(&s.criterion_id))
      .map(|suggestion| {
        let auto = settings.auto_accept && suggestion.weight >= settings.auto_accept_threshold;
        NewLink {
          audit_id,
          evidence_id,
          criterion_id: suggestion.criterion_id,
          weight: suggestion.weight,
          level_hint: None,
          origin: if auto { LinkOrigin::AutoAccepted } else { LinkOrigin::Suggested },
          status: if auto { LinkStatus::Confirmed } else { LinkStatus::Suggested },
          created_by: Actor::system(),
        }
      })
      .collect();
    let stored = self
      .store
      .add_links(fresh)
      .await
      .map_err(Error::store)?;
    for link in stored.iter().filter(|l| l.is_confirmed()) {
      self.flag_review(audit_id, link.criterion_id, actor).await?;
    }
    info!(%evidence_id, %actor, stored = stored.len(), "link suggestions stored");
    Ok(stored)
  }

  /// Criteria that already have a link, of any status, to this evidence.
  async fn linked_criteria(&self, audit_id: Uuid, evidence_id: Uuid) -> Result<HashSet<Uuid>> {
    Ok(
      self
        .store
        .list_links(LinkQuery::audit(audit_id).evidence(evidence_id))
        .await
        .map_err(Error::store)?
        .into_iter()
        .map(|l| l.criterion_id)
        .collect(),
    )
  }

  /// Promote a suggested link to confirmed. Confirming twice is a no-op.
  #[instrument(skip(self))]
  pub async fn confirm_link(&self, link_id: Uuid, actor: &Actor) -> Result<EvidenceLink> {
    let audit_id = self.get_link(link_id).await?.audit_id;
    let _guard = self.locks.lock(audit_id).await;
    self.load_audit(audit_id).await?.ensure_unlocked()?;
    let mut link = self.get_link(link_id).await?;
    if link.is_confirmed() {
      return Ok(link);
    }
    link.status = LinkStatus::Confirmed;
    link.confirmed_by = Some(actor.clone());
    link.confirmed_at = Some(Utc::now());
    self
      .store
      .update_link(link.clone())
      .await
      .map_err(Error::store)?;
    self.flag_review(audit_id, link.criterion_id, actor).await?;
    info!(%link_id, %actor, "link confirmed");
    Ok(link)
  }

  /// Remove a link. Removing a confirmed link flags an overridden assessment
  /// of its criterion for review.
  #[instrument(skip(self))]
  pub async fn reject_link(&self, link_id: Uuid, actor: &Actor) -> Result<()> {
    let audit_id = self.get_link(link_id).await?.audit_id;
    let _guard = self.locks.lock(audit_id).await;
    self.load_audit(audit_id).await?.ensure_unlocked()?;
    let link = self.get_link(link_id).await?;
    self
      .store
      .delete_link(link_id)
      .await
      .map_err(Error::store)?;
    if link.is_confirmed() {
      self.flag_review(audit_id, link.criterion_id, actor).await?;
    }
    info!(%link_id, %actor, was = %link.status, "link rejected");
    Ok(())
  }

  /// Create a manual, confirmed link to an in-scope criterion. An existing
  /// suggestion for the same pair is upgraded in place; an existing confirmed
  /// link is a conflict.
  #[instrument(skip(self))]
  pub async fn link_evidence(
    &self,
    evidence_id: Uuid,
    criterion_id: Uuid,
    weight: f32,
    level_hint: Option<MaturityLevel>,
    actor: &Actor,
  ) -> Result<EvidenceLink> {
    check_weight(weight)?;
    let audit_id = self.get_evidence(evidence_id).await?.audit_id;
    let _guard = self.locks.lock(audit_id).await;
    self.load_audit(audit_id).await?.ensure_unlocked()?;
    self.ensure_in_scope(audit_id, criterion_id).await?;

    let existing = self
      .store
      .list_links(
        LinkQuery::audit(audit_id)
          .evidence(evidence_id)
          .criterion(criterion_id),
      )
      .await
      .map_err(Error::store)?;

    let link = match existing.into_iter().next() {
      Some(link) if link.is_confirmed() => {
        return Err(Error::Conflict(format!(
          "evidence {evidence_id} is already linked to criterion {criterion_id}"
        )));
      }
      Some(mut link) => {
        link.weight = weight;
        link.level_hint = level_hint;
        link.origin = LinkOrigin::Manual;
        link.status = LinkStatus::Confirmed;
        link.confirmed_by = Some(actor.clone());
        link.confirmed_at = Some(Utc::now());
        self
          .store
          .update_link(link.clone())
          .await
          .map_err(Error::store)?;
        link
      }
      None => self
        .store
        .add_link(NewLink {
          audit_id,
          evidence_id,
          criterion_id,
          weight,
          level_hint,
          origin: LinkOrigin::Manual,
          status: LinkStatus::Confirmed,
          created_by: actor.clone(),
        })
        .await
        .map_err(Error::store)?,
    };
    self.flag_review(audit_id, criterion_id, actor).await?;
    info!(link_id = %link.link_id, %actor, "manual link created");
    Ok(link)
  }

  pub async fn get_link(&self, link_id: Uuid) -> Result<EvidenceLink> {
    self
      .store
      .get_link(link_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::not_found("link", link_id))
  }

  /// Links of one audit, optionally narrowed further by `query`.
  pub async fn list_links(&self, audit_id: Uuid, query: LinkQuery) -> Result<Vec<EvidenceLink>> {
    self.load_audit(audit_id).await?;
    self
      .store
      .list_links(LinkQuery {
        audit_id: Some(audit_id),
        ..query
      })
      .await
      .map_err(Error::store)
  }
}

#[cfg(test)]
mod tests {
  use std::time::{Duration, Instant};

  use assay_core::{
    audit::{AuditSettings, AuditState},
    criterion::Level,
  };

  use crate::testing::*;

  use super::*;

  #[tokio::test]
  async fn suggestions_are_ranked_and_not_authoritative() {
    let h = Harness::new().await;
    let audit = h.audit_in(AuditState::EvidenceCollection).await;
    let item = h
      .upload_text(audit.audit_id, "ci.txt", CI_NOTES)
      .await;

    let links = h
      .engine
      .suggest_links(item.evidence_id, None, &h.actor)
      .await
      .unwrap();
    assert!(!links.is_empty());
    assert_eq!(links[0].criterion_id, h.ci);
    assert!(links.windows(2).all(|w| w[0].weight >= w[1].weight));
    assert!(links.iter().all(|l| l.status == LinkStatus::Suggested));
    assert!(links.iter().all(|l| l.weight >= 0.3));
  }

  #[tokio::test]
  async fn auto_accept_confirms_confident_suggestions() {
    let h = Harness::new().await;
    let audit = h.audit_in(AuditState::EvidenceCollection).await;
    h.engine
      .update_settings(
        audit.audit_id,
        AuditSettings {
          auto_accept: true,
          auto_accept_threshold: 0.5,
          ..AuditSettings::default()
        },
        None,
        &h.actor,
      )
      .await
      .unwrap();
    let item = h
      .upload_text(audit.audit_id, "ci.txt", CI_NOTES)
      .await;

    let links = h
      .engine
      .suggest_links(item.evidence_id, Some(vec![h.ci]), &h.actor)
      .await
      .unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].status, LinkStatus::Confirmed);
    assert_eq!(links[0].origin, LinkOrigin::AutoAccepted);
  }

  #[tokio::test]
  async fn suggestions_need_extracted_content() {
    let h = Harness::new().await;
    let audit = h.audit_in(AuditState::EvidenceCollection).await;
    let outcomes = h
      .engine
      .upload_batch(audit.audit_id, vec![h.corrupt_image_upload()], &h.actor)
      .await
      .unwrap();
    let failed = outcomes[0].item().unwrap();
    let err = h
      .engine
      .suggest_links(failed.evidence_id, None, &h.actor)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
  }

  #[tokio::test]
  async fn analysis_outage_stores_nothing() {
    let h = Harness::new().await;
    let audit = h.audit_in(AuditState::EvidenceCollection).await;
    let item = h.upload_text(audit.audit_id, "a.txt", "automated repeatable").await;

    h.analysis.set_unavailable(true);
    let err = h
      .engine
      .suggest_links(item.evidence_id, None, &h.actor)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::AnalysisUnavailable(_)));
    assert!(err.is_retryable());
    assert!(
      h.engine
        .list_links(audit.audit_id, LinkQuery::default())
        .await
        .unwrap()
        .is_empty()
    );
  }

  #[tokio::test]
  async fn confirm_then_reject() {
    let h = Harness::new().await;
    let audit = h.audit_in(AuditState::EvidenceCollection).await;
    let item = h
      .upload_text(audit.audit_id, "ci.txt", CI_NOTES)
      .await;
    let links = h
      .engine
      .suggest_links(item.evidence_id, Some(vec![h.ci]), &h.actor)
      .await
      .unwrap();

    let confirmed = h.engine.confirm_link(links[0].link_id, &h.actor).await.unwrap();
    assert_eq!(confirmed.status, LinkStatus::Confirmed);
    assert_eq!(confirmed.confirmed_by, Some(h.actor.clone()));
    let again = h.engine.confirm_link(links[0].link_id, &h.actor).await.unwrap();
    assert_eq!(again, confirmed);

    h.engine.reject_link(links[0].link_id, &h.actor).await.unwrap();
    assert!(matches!(
      h.engine.get_link(links[0].link_id).await,
      Err(Error::NotFound { kind: "link", .. })
    ));
  }

  #[tokio::test]
  async fn manual_link_upgrades_suggestion_and_rejects_duplicates() {
    let h = Harness::new().await;
    let audit = h.audit_in(AuditState::EvidenceCollection).await;
    let item = h
      .upload_text(audit.audit_id, "ci.txt", CI_NOTES)
      .await;
    let suggested = h
      .engine
      .suggest_links(item.evidence_id, Some(vec![h.ci]), &h.actor)
      .await
      .unwrap();

    let manual = h
      .engine
      .link_evidence(item.evidence_id, h.ci, 0.9, Some(MaturityLevel::Intermediate), &h.actor)
      .await
      .unwrap();
    assert_eq!(manual.link_id, suggested[0].link_id);
    assert_eq!(manual.origin, LinkOrigin::Manual);
    assert!(manual.is_confirmed());

    let err = h
      .engine
      .link_evidence(item.evidence_id, h.ci, 0.5, None, &h.actor)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let err = h
      .engine
      .link_evidence(item.evidence_id, h.testing, 1.5, None, &h.actor)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }

  #[tokio::test]
  async fn link_changes_flag_overrides_on_that_criterion_only() {
    let h = Harness::new().await;
    let audit = h.audit_in(AuditState::Scoring).await;
    for id in [h.ci, h.testing] {
      h.engine
        .set_assessment(
          audit.audit_id,
          id,
          MaturityLevel::Novice,
          "Initial interview".into(),
          &h.actor,
        )
        .await
        .unwrap();
    }
    let item = h.upload_text(audit.audit_id, "a.txt", "automated repeatable").await;
    h.engine
      .link_evidence(item.evidence_id, h.ci, 0.8, None, &h.actor)
      .await
      .unwrap();

    let ci = h.engine.get_assessment(audit.audit_id, h.ci).await.unwrap();
    let testing = h.engine.get_assessment(audit.audit_id, h.testing).await.unwrap();
    assert!(ci.needs_review);
    assert!(!testing.needs_review);
    assert_eq!(ci.effective, Level::Novice);
  }

  #[tokio::test]
  async fn out_of_scope_criteria_cannot_be_linked() {
    let h = Harness::new().await;
    let audit = h.audit_in(AuditState::EvidenceCollection).await;
    let item = h.upload_text(audit.audit_id, "ci.txt", CI_NOTES).await;

    let err = h
      .engine
      .suggest_links(item.evidence_id, Some(vec![h.ci, h.docs]), &h.actor)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = h
      .engine
      .link_evidence(item.evidence_id, h.docs, 0.8, None, &h.actor)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(
      h.engine
        .list_links(audit.audit_id, LinkQuery::default())
        .await
        .unwrap()
        .is_empty()
    );
  }

  #[tokio::test]
  async fn scoring_does_not_hold_the_audit_lock() {
    let h = Harness::new().await;
    let audit = h.audit_in(AuditState::EvidenceCollection).await;
    let item = h.upload_text(audit.audit_id, "ci.txt", CI_NOTES).await;
    let other = h.upload_text(audit.audit_id, "b.txt", "automated repeatable").await;
    let manual = h
      .engine
      .link_evidence(other.evidence_id, h.testing, 0.6, None, &h.actor)
      .await
      .unwrap();

    h.analysis.set_delay(Some(Duration::from_millis(800)));
    let (links, reject_took) = tokio::join!(
      h.engine.suggest_links(item.evidence_id, None, &h.actor),
      async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let start = Instant::now();
        h.engine.reject_link(manual.link_id, &h.actor).await.unwrap();
        start.elapsed()
      },
    );
    assert!(!links.unwrap().is_empty());
    assert!(reject_took < Duration::from_millis(400), "waited {reject_took:?}");
  }

  #[tokio::test]
  async fn evidence_deleted_during_scoring_stores_nothing() {
    let h = Harness::new().await;
    let audit = h.audit_in(AuditState::EvidenceCollection).await;
    let item = h.upload_text(audit.audit_id, "ci.txt", CI_NOTES).await;

    h.analysis.set_delay(Some(Duration::from_millis(300)));
    let (result, _) = tokio::join!(
      h.engine.suggest_links(item.evidence_id, None, &h.actor),
      async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.engine.delete_evidence(item.evidence_id, &h.actor).await.unwrap();
      },
    );
    assert!(matches!(result, Err(Error::NotFound { kind: "evidence", .. })));
    assert!(
      h.engine
        .list_links(audit.audit_id, LinkQuery::default())
        .await
        .unwrap()
        .is_empty()
    );
  }
}
