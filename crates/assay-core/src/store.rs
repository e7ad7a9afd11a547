//! The `AuditStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `assay-store-sqlite`).
//! The engine depends on this abstraction, not on any concrete backend.
//! Lifecycle and scoring rules live above the store; it only persists.

use std::future::Future;

use uuid::Uuid;

use crate::{
  assessment::MaturityAssessment,
  audit::{Audit, Company, NewAudit, NewCompany, Selection},
  criterion::CriterionNode,
  evidence::{EvidenceItem, NewEvidence},
  link::{EvidenceLink, LinkStatus, NewLink},
  question::{Answer, NewAnswer, NewQuestion, Question},
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// Which criteria [`AuditStore::list_criteria`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriteriaScope {
  /// The shared base taxonomy only.
  Base,
  /// The base taxonomy plus the custom criteria of one audit.
  Audit(Uuid),
  /// Only the custom criteria of one audit.
  CustomOnly(Uuid),
}

/// Parameters for [`AuditStore::list_links`]. Unset fields do not filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkQuery {
  pub audit_id:     Option<Uuid>,
  pub evidence_id:  Option<Uuid>,
  pub criterion_id: Option<Uuid>,
  pub status:       Option<LinkStatus>,
}

impl LinkQuery {
  pub fn audit(audit_id: Uuid) -> Self {
    Self {
      audit_id: Some(audit_id),
      ..Self::default()
    }
  }

  pub fn confirmed(mut self) -> Self {
    self.status = Some(LinkStatus::Confirmed);
    self
  }

  pub fn criterion(mut self, criterion_id: Uuid) -> Self {
    self.criterion_id = Some(criterion_id);
    self
  }

  pub fn evidence(mut self, evidence_id: Uuid) -> Self {
    self.evidence_id = Some(evidence_id);
    self
  }
}

/// Parameters for [`AuditStore::list_questions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionQuery {
  pub audit_id:        Uuid,
  pub criterion_id:    Option<Uuid>,
  /// Only questions with no answer yet.
  pub unanswered_only: bool,
}

impl QuestionQuery {
  pub fn audit(audit_id: Uuid) -> Self {
    Self {
      audit_id,
      criterion_id: None,
      unanswered_only: false,
    }
  }

  pub fn criterion(mut self, criterion_id: Uuid) -> Self {
    self.criterion_id = Some(criterion_id);
    self
  }

  pub fn unanswered(mut self) -> Self {
    self.unanswered_only = true;
    self
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over an Assay storage backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`). Lookups return
/// `Ok(None)` for missing rows; the engine turns those into not-found errors.
pub trait AuditStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Companies ─────────────────────────────────────────────────────────

  fn add_company(
    &self,
    company: NewCompany,
  ) -> impl Future<Output = Result<Company, Self::Error>> + Send + '_;

  fn get_company(
    &self,
    company_id: Uuid,
  ) -> impl Future<Output = Result<Option<Company>, Self::Error>> + Send + '_;

  fn list_companies(
    &self,
  ) -> impl Future<Output = Result<Vec<Company>, Self::Error>> + Send + '_;

  /// Delete a company and, through it, every audit it owns. Returns whether a
  /// row was removed.
  fn delete_company(
    &self,
    company_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Audits ────────────────────────────────────────────────────────────

  fn add_audit(
    &self,
    audit: NewAudit,
  ) -> impl Future<Output = Result<Audit, Self::Error>> + Send + '_;

  fn get_audit(
    &self,
    audit_id: Uuid,
  ) -> impl Future<Output = Result<Option<Audit>, Self::Error>> + Send + '_;

  /// All audits, or those of one company, oldest first.
  fn list_audits(
    &self,
    company_id: Option<Uuid>,
  ) -> impl Future<Output = Result<Vec<Audit>, Self::Error>> + Send + '_;

  /// Write `audit` if the stored version still equals `audit.version`.
  ///
  /// On success the stored version is bumped and the new row returned.
  /// Returns `Ok(None)` when the version is stale or the audit is gone.
  fn update_audit(
    &self,
    audit: Audit,
  ) -> impl Future<Output = Result<Option<Audit>, Self::Error>> + Send + '_;

  /// Write `audit` under the same version check as [`Self::update_audit`]
  /// and upsert `assessments`, all in one transaction. On a stale version
  /// nothing is written and `Ok(None)` is returned.
  fn update_audit_with_assessments(
    &self,
    audit: Audit,
    assessments: Vec<MaturityAssessment>,
  ) -> impl Future<Output = Result<Option<Audit>, Self::Error>> + Send + '_;

  /// Delete an audit with its selection, custom criteria, evidence, links,
  /// assessments and questions. Returns whether a row was removed.
  fn delete_audit(
    &self,
    audit_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Criteria ──────────────────────────────────────────────────────────

  /// Insert nodes atomically. Either all are stored or none.
  fn insert_criteria(
    &self,
    nodes: Vec<CriterionNode>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_criterion(
    &self,
    criterion_id: Uuid,
  ) -> impl Future<Output = Result<Option<CriterionNode>, Self::Error>> + Send + '_;

  /// Criteria in insertion order.
  fn list_criteria(
    &self,
    scope: CriteriaScope,
  ) -> impl Future<Output = Result<Vec<CriterionNode>, Self::Error>> + Send + '_;

  /// Replace a node's content. Returns whether a row was updated.
  fn update_criterion(
    &self,
    node: CriterionNode,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Delete nodes atomically, together with any selection rows, assessments
  /// and questions that reference them.
  fn delete_criteria(
    &self,
    criterion_ids: Vec<Uuid>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Selection ─────────────────────────────────────────────────────────

  /// Replace the audit's selection wholesale.
  fn set_selection(
    &self,
    audit_id: Uuid,
    selection: Vec<Selection>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_selection(
    &self,
    audit_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Selection>, Self::Error>> + Send + '_;

  // ── Evidence ──────────────────────────────────────────────────────────

  fn add_evidence(
    &self,
    evidence: NewEvidence,
  ) -> impl Future<Output = Result<EvidenceItem, Self::Error>> + Send + '_;

  fn get_evidence(
    &self,
    evidence_id: Uuid,
  ) -> impl Future<Output = Result<Option<EvidenceItem>, Self::Error>> + Send + '_;

  /// Evidence of one audit, in upload order.
  fn list_evidence(
    &self,
    audit_id: Uuid,
  ) -> impl Future<Output = Result<Vec<EvidenceItem>, Self::Error>> + Send + '_;

  /// Persist status, content and failure of an existing item.
  fn update_evidence(
    &self,
    evidence: EvidenceItem,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Items with the given content hash, optionally limited to one audit.
  fn find_evidence_by_hash(
    &self,
    content_hash: String,
    audit_id: Option<Uuid>,
  ) -> impl Future<Output = Result<Vec<EvidenceItem>, Self::Error>> + Send + '_;

  /// Delete an item and its links. Returns whether a row was removed.
  fn delete_evidence(
    &self,
    evidence_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Links ─────────────────────────────────────────────────────────────

  fn add_link(
    &self,
    link: NewLink,
  ) -> impl Future<Output = Result<EvidenceLink, Self::Error>> + Send + '_;

  /// Insert links atomically, returning them in input order. Either all are
  /// stored or none.
  fn add_links(
    &self,
    links: Vec<NewLink>,
  ) -> impl Future<Output = Result<Vec<EvidenceLink>, Self::Error>> + Send + '_;

  fn get_link(
    &self,
    link_id: Uuid,
  ) -> impl Future<Output = Result<Option<EvidenceLink>, Self::Error>> + Send + '_;

  /// Links matching `query`, oldest first.
  fn list_links(
    &self,
    query: LinkQuery,
  ) -> impl Future<Output = Result<Vec<EvidenceLink>, Self::Error>> + Send + '_;

  fn update_link(
    &self,
    link: EvidenceLink,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn delete_link(
    &self,
    link_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Assessments ───────────────────────────────────────────────────────

  fn get_assessment(
    &self,
    audit_id: Uuid,
    criterion_id: Uuid,
  ) -> impl Future<Output = Result<Option<MaturityAssessment>, Self::Error>> + Send + '_;

  fn list_assessments(
    &self,
    audit_id: Uuid,
  ) -> impl Future<Output = Result<Vec<MaturityAssessment>, Self::Error>> + Send + '_;

  /// Upsert assessments keyed by (audit, criterion) in one transaction.
  fn put_assessments(
    &self,
    assessments: Vec<MaturityAssessment>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Questions ─────────────────────────────────────────────────────────

  /// Insert questions atomically, returning them in input order.
  fn add_questions(
    &self,
    questions: Vec<NewQuestion>,
  ) -> impl Future<Output = Result<Vec<Question>, Self::Error>> + Send + '_;

  fn get_question(
    &self,
    question_id: Uuid,
  ) -> impl Future<Output = Result<Option<Question>, Self::Error>> + Send + '_;

  /// Questions matching `query`, oldest first.
  fn list_questions(
    &self,
    query: QuestionQuery,
  ) -> impl Future<Output = Result<Vec<Question>, Self::Error>> + Send + '_;

  fn add_answer(
    &self,
    answer: NewAnswer,
  ) -> impl Future<Output = Result<Answer, Self::Error>> + Send + '_;

  /// Answers to one question, oldest first.
  fn list_answers(
    &self,
    question_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Answer>, Self::Error>> + Send + '_;
}
