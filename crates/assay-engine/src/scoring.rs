//! The maturity scoring aggregator.
//!
//! Recomputation reads everything it needs without holding the audit lock,
//! asks the analysis service for every (link, level) alignment, then takes
//! the lock and checks that neither the confirmed links nor the stored
//! assessments moved underneath it before writing. A failed analysis call
//! leaves every stored assessment as it was.

use std::collections::{HashMap, HashSet};

use assay_core::{
  Actor, Error, Result,
  analysis::AnalysisService,
  assessment::{
    Computation, HumanOverride, LinkAlignment, MaturityAssessment, score_direct,
  },
  audit::Audit,
  blob::BlobStore,
  criterion::{Level, MaturityLevel},
  link::EvidenceLink,
  store::{AuditStore, LinkQuery},
  taxonomy::Taxonomy,
};
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::Engine;

fn ensure_accepts_scoring(audit: &Audit) -> Result<()> {
  audit.ensure_unlocked()?;
  if !audit.state.accepts_scoring() {
    return Err(Error::Conflict(format!(
      "audit {} is {}; scoring happens during evidence collection and scoring",
      audit.audit_id, audit.state
    )));
  }
  Ok(())
}

/// What a recomputation read, compared again before writing.
#[derive(PartialEq)]
struct Snapshot {
  version:     u64,
  links:       Vec<(Uuid, u32, Option<MaturityLevel>)>,
  assessments: Vec<MaturityAssessment>,
}

fn link_key(links: &[EvidenceLink], nodes: &HashSet<Uuid>) -> Vec<(Uuid, u32, Option<MaturityLevel>)> {
  let mut key: Vec<_> = links
    .iter()
    .filter(|l| nodes.contains(&l.criterion_id))
    .map(|l| (l.link_id, l.weight.to_bits(), l.level_hint))
    .collect();
  key.sort();
  key
}

fn assessment_key(
  assessments: &HashMap<Uuid, MaturityAssessment>,
  nodes: &[Uuid],
) -> Vec<MaturityAssessment> {
  nodes
    .iter()
    .filter_map(|id| assessments.get(id).cloned())
    .collect()
}

impl<S, B, A> Engine<S, B, A>
where
  S: AuditStore,
  B: BlobStore,
  A: AnalysisService,
{
  /// Recompute `criterion_id` and the in-scope subtree below it, bottom-up.
  ///
  /// Running it again without any data change writes nothing and returns
  /// the same assessment.
  #[instrument(skip(self))]
  pub async fn compute_assessment(
    &self,
    audit_id: Uuid,
    criterion_id: Uuid,
    actor: &Actor,
  ) -> Result<MaturityAssessment> {
    let mut results = self.recompute(audit_id, Some(criterion_id), actor).await?;
    results
      .remove(&criterion_id)
      .ok_or_else(|| Error::not_found("assessment", criterion_id))
  }

  /// Recompute every in-scope criterion. Returns assessments in taxonomy
  /// order.
  #[instrument(skip(self))]
  pub async fn compute_all(&self, audit_id: Uuid, actor: &Actor) -> Result<Vec<MaturityAssessment>> {
    let mut results = self.recompute(audit_id, None, actor).await?;
    let taxonomy = self.audit_taxonomy(audit_id).await?;
    Ok(
      taxonomy
        .preorder()
        .into_iter()
        .filter_map(|id| results.remove(&id))
        .collect(),
    )
  }

  async fn recompute(
    &self,
    audit_id: Uuid,
    root: Option<Uuid>,
    actor: &Actor,
  ) -> Result<HashMap<Uuid, MaturityAssessment>> {
    // ── Read ──
    let audit = self.load_audit(audit_id).await?;
    ensure_accepts_scoring(&audit)?;
    let taxonomy = self.audit_taxonomy(audit_id).await?;
    let scope = self.scope_of(audit_id, &taxonomy).await?;

    let nodes: Vec<Uuid> = match root {
      Some(id) => {
        if !scope.contains(&id) {
          taxonomy.get_node(id)?;
          return Err(Error::invalid(format!(
            "criterion {id} is not in scope for audit {audit_id}"
          )));
        }
        taxonomy.subtree(id)?
      }
      None => taxonomy.preorder(),
    }
    .into_iter()
    .filter(|id| scope.contains(id))
    .collect();
    let node_set: HashSet<Uuid> = nodes.iter().copied().collect();

    let links = self.confirmed_links(audit_id).await?;
    let existing = self.assessment_map(audit_id).await?;
    let before = Snapshot {
      version:     audit.version,
      links:       link_key(&links, &node_set),
      assessments: assessment_key(&existing, &nodes),
    };

    // ── Score ──
    let alignments = self.align(&taxonomy, &links, &node_set).await?;

    // ── Aggregate ──
    let coverage = self.config.coverage_threshold;
    let now = Utc::now();
    let mut effective: HashMap<Uuid, Level> = HashMap::new();
    let mut results: HashMap<Uuid, MaturityAssessment> = HashMap::new();
    let mut changed = Vec::new();

    for id in nodes.iter().rev() {
      let own = alignments.get(id).map(Vec::as_slice).unwrap_or_default();
      let children: Vec<Level> = taxonomy
        .children(*id)?
        .into_iter()
        .filter_map(|c| effective.get(&c.criterion_id).copied())
        .collect();
      let contributing = own.iter().map(|a| a.link_id).collect();
      let computation = Computation::new(score_direct(own, coverage), &children, contributing);
      let rationale = computation.explain(coverage);
      debug!(criterion_id = %id, computed = %computation.computed, %rationale, "criterion scored");

      let mut assessment = existing
        .get(id)
        .cloned()
        .unwrap_or_else(|| MaturityAssessment::unassessed(audit_id, *id, actor.clone(), now));
      if assessment.apply(computation, rationale, actor.clone(), now) || !existing.contains_key(id) {
        changed.push(assessment.clone());
      }
      effective.insert(*id, assessment.effective);
      results.insert(*id, assessment);
    }

    // ── Write ──
    let _guard = self.locks.lock(audit_id).await;
    let audit = self.load_audit(audit_id).await?;
    ensure_accepts_scoring(&audit)?;
    let after = Snapshot {
      version:     audit.version,
      links:       link_key(&self.confirmed_links(audit_id).await?, &node_set),
      assessments: assessment_key(&self.assessment_map(audit_id).await?, &nodes),
    };
    if before != after {
      warn!(%audit_id, "data changed during recomputation");
      return Err(Error::Conflict(format!(
        "audit {audit_id} changed while scoring; recompute again"
      )));
    }

    let written = changed.len();
    if !changed.is_empty() {
      self
        .store
        .put_assessments(changed)
        .await
        .map_err(Error::store)?;
    }
    info!(%audit_id, %actor, criteria = nodes.len(), written, "assessments recomputed");
    Ok(results)
  }

  /// Semantic alignment of each confirmed link's evidence against every
  /// maturity description of its criterion, grouped by criterion. Links whose
  /// evidence has no extracted text are left out.
  async fn align(
    &self,
    taxonomy: &Taxonomy,
    links: &[EvidenceLink],
    nodes: &HashSet<Uuid>,
  ) -> Result<HashMap<Uuid, Vec<LinkAlignment>>> {
    let mut inputs = Vec::new();
    for link in links.iter().filter(|l| nodes.contains(&l.criterion_id)) {
      let Some(item) = self
        .store
        .get_evidence(link.evidence_id)
        .await
        .map_err(Error::store)?
      else {
        continue;
      };
      let Some(text) = item.text().map(str::to_owned) else {
        debug!(link_id = %link.link_id, status = %item.status, "link skipped; no extracted text");
        continue;
      };
      let node = taxonomy.get_node(link.criterion_id)?;
      inputs.push((link, text, node));
    }

    let scored = join_all(inputs.iter().map(|(link, text, node)| async move {
      let mut scores = [0.0; 3];
      for level in MaturityLevel::ALL {
        scores[level.index()] = self
          .gate
          .run(self.analysis.semantic_score(text, node.maturity.get(level)))
          .await?;
      }
      Ok::<_, Error>(LinkAlignment {
        link_id: link.link_id,
        weight: link.weight,
        hint: link.level_hint,
        scores,
      })
    }))
    .await;

    let mut grouped: HashMap<Uuid, Vec<LinkAlignment>> = HashMap::new();
    for ((link, ..), alignment) in inputs.iter().zip(scored) {
      grouped.entry(link.criterion_id).or_default().push(alignment?);
    }
    Ok(grouped)
  }

  async fn confirmed_links(&self, audit_id: Uuid) -> Result<Vec<EvidenceLink>> {
    self
      .store
      .list_links(LinkQuery::audit(audit_id).confirmed())
      .await
      .map_err(Error::store)
  }

  async fn assessment_map(&self, audit_id: Uuid) -> Result<HashMap<Uuid, MaturityAssessment>> {
    Ok(
      self
        .store
        .list_assessments(audit_id)
        .await
        .map_err(Error::store)?
        .into_iter()
        .map(|a| (a.criterion_id, a))
        .collect(),
    )
  }

  // ── Overrides ─────────────────────────────────────────────────────────

  /// Record a human decision for a criterion. It stays effective until
  /// cleared; evidence changes on the criterion only flag it for review.
  #[instrument(skip(self, rationale))]
  pub async fn set_assessment(
    &self,
    audit_id: Uuid,
    criterion_id: Uuid,
    level: MaturityLevel,
    rationale: String,
    actor: &Actor,
  ) -> Result<MaturityAssessment> {
    if rationale.trim().is_empty() {
      return Err(Error::invalid("an override needs a rationale"));
    }
    let _guard = self.locks.lock(audit_id).await;
    let audit = self.load_audit(audit_id).await?;
    ensure_accepts_scoring(&audit)?;
    self.ensure_in_scope(audit_id, criterion_id).await?;

    let now = Utc::now();
    let mut assessment = self
      .existing_assessment(audit_id, criterion_id)
      .await?
      .unwrap_or_else(|| MaturityAssessment::unassessed(audit_id, criterion_id, actor.clone(), now));
    assessment.set_override(HumanOverride {
      level,
      rationale,
      actor: actor.clone(),
      at: now,
    });
    self
      .store
      .put_assessments(vec![assessment.clone()])
      .await
      .map_err(Error::store)?;
    info!(%audit_id, %criterion_id, %level, %actor, "assessment overridden");
    Ok(assessment)
  }

  /// Remove a human override so the computed level applies again.
  #[instrument(skip(self))]
  pub async fn clear_override(
    &self,
    audit_id: Uuid,
    criterion_id: Uuid,
    actor: &Actor,
  ) -> Result<MaturityAssessment> {
    let _guard = self.locks.lock(audit_id).await;
    let audit = self.load_audit(audit_id).await?;
    ensure_accepts_scoring(&audit)?;
    let mut assessment = self
      .existing_assessment(audit_id, criterion_id)
      .await?
      .ok_or_else(|| Error::not_found("assessment", criterion_id))?;
    if assessment.clear_override(actor.clone(), Utc::now()) {
      self
        .store
        .put_assessments(vec![assessment.clone()])
        .await
        .map_err(Error::store)?;
      info!(%audit_id, %criterion_id, %actor, "override cleared");
    }
    Ok(assessment)
  }

  // ── Reads ─────────────────────────────────────────────────────────────

  pub async fn get_assessment(
    &self,
    audit_id: Uuid,
    criterion_id: Uuid,
  ) -> Result<MaturityAssessment> {
    self.load_audit(audit_id).await?;
    self
      .existing_assessment(audit_id, criterion_id)
      .await?
      .ok_or_else(|| Error::not_found("assessment", criterion_id))
  }

  pub async fn list_assessments(&self, audit_id: Uuid) -> Result<Vec<MaturityAssessment>> {
    self.load_audit(audit_id).await?;
    self
      .store
      .list_assessments(audit_id)
      .await
      .map_err(Error::store)
  }
}
