//! Criteria taxonomy: base import, validation and per-audit customisation.
//!
//! The base taxonomy is shared by every audit and never edited through an
//! audit. Audits extend it with custom criteria, either written from scratch
//! or copied from a base subtree.

use std::collections::HashMap;

use assay_core::{
  Actor, Error, Result,
  analysis::AnalysisService,
  audit::Selection,
  blob::BlobStore,
  criterion::{CriterionNode, NewCriterion},
  error::{Problem, Problems},
  store::{AuditStore, CriteriaScope, LinkQuery},
  taxonomy::{SectionDocument, Taxonomy, nodes_from_sections},
};
use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::Engine;

fn check_new_criterion(id: Uuid, input: &NewCriterion) -> Result<()> {
  let mut problems = Vec::new();
  if input.title.trim().is_empty() {
    problems.push(Problem::Input {
      message: "criterion title must not be empty".into(),
    });
  }
  for level in input.maturity.missing() {
    problems.push(Problem::MissingMaturityText {
      criterion_id: id,
      level,
    });
  }
  if problems.is_empty() {
    Ok(())
  } else {
    Err(Error::Validation(Problems(problems)))
  }
}

fn in_order(taxonomy: &Taxonomy) -> Result<Vec<CriterionNode>> {
  taxonomy
    .preorder()
    .into_iter()
    .map(|id| taxonomy.get_node(id).cloned())
    .collect()
}

impl<S, B, A> Engine<S, B, A>
where
  S: AuditStore,
  B: BlobStore,
  A: AnalysisService,
{
  // ── Base taxonomy ─────────────────────────────────────────────────────

  /// Add criteria documents to the base taxonomy. The combined tree must
  /// validate; nothing is stored otherwise.
  #[instrument(skip(self, sections), fields(sections = sections.len()))]
  pub async fn import_taxonomy(
    &self,
    sections: Vec<SectionDocument>,
    actor: &Actor,
  ) -> Result<Vec<CriterionNode>> {
    let nodes = nodes_from_sections(sections, Utc::now())?;
    let existing = self
      .store
      .list_criteria(CriteriaScope::Base)
      .await
      .map_err(Error::store)?;
    let combined = Taxonomy::new(existing.into_iter().chain(nodes.iter().cloned()));
    combined.validate()?;

    self
      .store
      .insert_criteria(nodes.clone())
      .await
      .map_err(Error::store)?;
    info!(%actor, imported = nodes.len(), "base taxonomy imported");
    Ok(nodes)
  }

  /// The base taxonomy in taxonomy order.
  pub async fn base_taxonomy(&self) -> Result<Vec<CriterionNode>> {
    let nodes = self
      .store
      .list_criteria(CriteriaScope::Base)
      .await
      .map_err(Error::store)?;
    in_order(&Taxonomy::new(nodes))
  }

  /// Base taxonomy plus the audit's custom criteria, in taxonomy order.
  pub async fn audit_criteria(&self, audit_id: Uuid) -> Result<Vec<CriterionNode>> {
    self.load_audit(audit_id).await?;
    in_order(&self.audit_taxonomy(audit_id).await?)
  }

  pub async fn get_criterion(&self, criterion_id: Uuid) -> Result<CriterionNode> {
    self
      .store
      .get_criterion(criterion_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::not_found("criterion", criterion_id))
  }

  /// Validate the base taxonomy, or the one an audit sees when `audit_id`
  /// is given.
  pub async fn validate_taxonomy(&self, audit_id: Option<Uuid>) -> Result<()> {
    let taxonomy = match audit_id {
      Some(id) => {
        self.load_audit(id).await?;
        self.audit_taxonomy(id).await?
      }
      None => Taxonomy::new(
        self
          .store
          .list_criteria(CriteriaScope::Base)
          .await
          .map_err(Error::store)?,
      ),
    };
    taxonomy.validate()
  }

  // ── Custom criteria ───────────────────────────────────────────────────

  /// Add a criterion owned by one audit. It is selected for the audit
  /// straight away.
  #[instrument(skip(self, input), fields(title = %input.title))]
  pub async fn add_custom_criterion(
    &self,
    audit_id: Uuid,
    input: NewCriterion,
    actor: &Actor,
  ) -> Result<CriterionNode> {
    let _guard = self.locks.lock(audit_id).await;
    self.load_audit(audit_id).await?.ensure_unlocked()?;
    let taxonomy = self.audit_taxonomy(audit_id).await?;
    if let Some(parent) = input.parent_id {
      taxonomy.get_node(parent)?;
    }

    let criterion_id = Uuid::new_v4();
    check_new_criterion(criterion_id, &input)?;
    let node = CriterionNode {
      criterion_id,
      parent_id: input.parent_id,
      children: Vec::new(),
      title: input.title,
      description: input.description,
      section: input.section,
      maturity: input.maturity,
      audit_id: Some(audit_id),
      created_at: Utc::now(),
    };

    self
      .store
      .insert_criteria(vec![node.clone()])
      .await
      .map_err(Error::store)?;
    let mut selection = self
      .store
      .get_selection(audit_id)
      .await
      .map_err(Error::store)?;
    selection.push(Selection {
      criterion_id:   node.criterion_id,
      expected_level: None,
    });
    self
      .store
      .set_selection(audit_id, selection)
      .await
      .map_err(Error::store)?;

    info!(%audit_id, criterion_id = %node.criterion_id, %actor, "custom criterion added");
    Ok(node)
  }

  /// Rewrite a custom criterion. Criteria with links are frozen.
  #[instrument(skip(self, input))]
  pub async fn update_custom_criterion(
    &self,
    audit_id: Uuid,
    criterion_id: Uuid,
    input: NewCriterion,
    actor: &Actor,
  ) -> Result<CriterionNode> {
    let _guard = self.locks.lock(audit_id).await;
    self.load_audit(audit_id).await?.ensure_unlocked()?;
    let current = self.custom_criterion(audit_id, criterion_id).await?;
    self.ensure_unlinked(audit_id, &[criterion_id]).await?;
    check_new_criterion(criterion_id, &input)?;

    let updated = CriterionNode {
      parent_id: input.parent_id,
      title: input.title,
      description: input.description,
      section: input.section,
      maturity: input.maturity,
      ..current
    };
    let taxonomy = self.audit_taxonomy(audit_id).await?;
    if let Some(parent) = updated.parent_id {
      taxonomy.get_node(parent)?;
    }
    Taxonomy::new(taxonomy.nodes().map(|n| {
      if n.criterion_id == criterion_id {
        updated.clone()
      } else {
        n.clone()
      }
    }))
    .validate()?;

    self
      .store
      .update_criterion(updated.clone())
      .await
      .map_err(Error::store)?;
    info!(%audit_id, %criterion_id, %actor, "custom criterion updated");
    Ok(updated)
  }

  /// Delete a custom criterion and the custom subtree below it.
  #[instrument(skip(self))]
  pub async fn delete_custom_criterion(
    &self,
    audit_id: Uuid,
    criterion_id: Uuid,
    actor: &Actor,
  ) -> Result<()> {
    let _guard = self.locks.lock(audit_id).await;
    self.load_audit(audit_id).await?.ensure_unlocked()?;
    self.custom_criterion(audit_id, criterion_id).await?;
    let ids = self.audit_taxonomy(audit_id).await?.subtree(criterion_id)?;
    self.ensure_unlinked(audit_id, &ids).await?;

    self
      .store
      .delete_criteria(ids.clone())
      .await
      .map_err(Error::store)?;
    info!(%audit_id, %criterion_id, %actor, removed = ids.len(), "custom criteria deleted");
    Ok(())
  }

  /// Copy a subtree into custom criteria owned by the audit. Selections that
  /// pointed into the original subtree are moved to the copies.
  #[instrument(skip(self))]
  pub async fn customise_subtree(
    &self,
    audit_id: Uuid,
    root: Uuid,
    actor: &Actor,
  ) -> Result<Vec<CriterionNode>> {
    let _guard = self.locks.lock(audit_id).await;
    self.load_audit(audit_id).await?.ensure_unlocked()?;
    let taxonomy = self.audit_taxonomy(audit_id).await?;
    let originals = taxonomy.subtree(root)?;
    let copies = taxonomy.clone_subtree(root, audit_id, Utc::now())?;

    self
      .store
      .insert_criteria(copies.clone())
      .await
      .map_err(Error::store)?;

    let remap: HashMap<Uuid, Uuid> = originals
      .iter()
      .copied()
      .zip(copies.iter().map(|c| c.criterion_id))
      .collect();
    let selection: Vec<Selection> = self
      .store
      .get_selection(audit_id)
      .await
      .map_err(Error::store)?
      .into_iter()
      .map(|s| Selection {
        criterion_id: remap.get(&s.criterion_id).copied().unwrap_or(s.criterion_id),
        ..s
      })
      .collect();
    self
      .store
      .set_selection(audit_id, selection)
      .await
      .map_err(Error::store)?;

    info!(%audit_id, %root, %actor, copied = copies.len(), "subtree customised");
    Ok(copies)
  }

  async fn custom_criterion(&self, audit_id: Uuid, criterion_id: Uuid) -> Result<CriterionNode> {
    let node = self.get_criterion(criterion_id).await?;
    if node.audit_id != Some(audit_id) {
      return Err(Error::Conflict(format!(
        "criterion {criterion_id} is not a custom criterion of audit {audit_id}"
      )));
    }
    Ok(node)
  }

  async fn ensure_unlinked(&self, audit_id: Uuid, ids: &[Uuid]) -> Result<()> {
    for id in ids {
      let links = self
        .store
        .list_links(LinkQuery::audit(audit_id).criterion(*id))
        .await
        .map_err(Error::store)?;
      if !links.is_empty() {
        return Err(Error::Conflict(format!(
          "criterion {id} has {} evidence link(s) and cannot change",
          links.len()
        )));
      }
    }
    Ok(())
  }
}
