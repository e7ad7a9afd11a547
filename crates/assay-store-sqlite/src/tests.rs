//! Integration tests for `SqliteStore` against an in-memory database.

use assay_core::{
  Actor,
  assessment::{HumanOverride, MaturityAssessment},
  audit::{AuditState, NewAudit, NewCompany, Selection},
  blob::ArtifactHandle,
  criterion::{CriterionNode, Level, MaturityDefinitions, MaturityLevel},
  evidence::{ExtractedContent, ExtractionStatus, MediaKind, NewEvidence, Segment},
  link::{LinkOrigin, LinkStatus, NewLink},
  question::{NewAnswer, NewQuestion},
  store::{AuditStore, CriteriaScope, LinkQuery, QuestionQuery},
};
use chrono::Utc;
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

async fn audit(s: &SqliteStore) -> assay_core::audit::Audit {
  let company = s
    .add_company(NewCompany {
      name:        "Acme".into(),
      description: None,
      sector:      Some("logistics".into()),
    })
    .await
    .unwrap();
  s.add_audit(NewAudit {
    company_id:  company.company_id,
    name:        "2026 platform audit".into(),
    description: None,
    settings:    None,
  })
  .await
  .unwrap()
}

fn criterion(parent: Option<Uuid>, audit_id: Option<Uuid>, title: &str) -> CriterionNode {
  CriterionNode {
    criterion_id: Uuid::new_v4(),
    parent_id: parent,
    children: Vec::new(),
    title: title.into(),
    description: format!("{title} practices"),
    section: Some("Engineering".into()),
    maturity: MaturityDefinitions {
      novice:       "ad hoc".into(),
      intermediate: "repeatable".into(),
      advanced:     "measured and optimised".into(),
    },
    audit_id,
    created_at: Utc::now(),
  }
}

fn new_evidence(audit_id: Uuid, hash: &str) -> NewEvidence {
  NewEvidence {
    audit_id,
    artifact: ArtifactHandle::new(hash),
    filename: Some("runbook.txt".into()),
    content_hash: hash.into(),
    size_bytes: 42,
    media_kind: MediaKind::Text,
    uploaded_by: Actor::new("auditor"),
  }
}

fn new_link(audit_id: Uuid, evidence_id: Uuid, criterion_id: Uuid, status: LinkStatus) -> NewLink {
  NewLink {
    audit_id,
    evidence_id,
    criterion_id,
    weight: 0.5,
    level_hint: None,
    origin: LinkOrigin::Suggested,
    status,
    created_by: Actor::system(),
  }
}

// ─── Companies & audits ──────────────────────────────────────────────────────

#[tokio::test]
async fn add_and_get_audit() {
  let s = store().await;
  let a = audit(&s).await;
  assert_eq!(a.state, AuditState::Draft);
  assert_eq!(a.version, 0);

  let fetched = s.get_audit(a.audit_id).await.unwrap().unwrap();
  assert_eq!(fetched, a);
}

#[tokio::test]
async fn get_audit_missing_returns_none() {
  let s = store().await;
  assert!(s.get_audit(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn audit_for_unknown_company_is_rejected() {
  let s = store().await;
  let err = s
    .add_audit(NewAudit {
      company_id:  Uuid::new_v4(),
      name:        "orphan".into(),
      description: None,
      settings:    None,
    })
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::CompanyNotFound(_)));
}

#[tokio::test]
async fn list_audits_filters_by_company() {
  let s = store().await;
  let first = audit(&s).await;
  audit(&s).await;

  assert_eq!(s.list_audits(None).await.unwrap().len(), 2);
  let mine = s.list_audits(Some(first.company_id)).await.unwrap();
  assert_eq!(mine.len(), 1);
  assert_eq!(mine[0].audit_id, first.audit_id);
}

#[tokio::test]
async fn update_audit_bumps_version_and_rejects_stale_writers() {
  let s = store().await;
  let a = audit(&s).await;

  let mut moved = a.clone();
  moved.state = AuditState::CriteriaSelected;
  let saved = s.update_audit(moved).await.unwrap().unwrap();
  assert_eq!(saved.version, 1);
  assert_eq!(saved.state, AuditState::CriteriaSelected);

  // Still carries version 0.
  let mut stale = a;
  stale.name = "renamed".into();
  assert!(s.update_audit(stale).await.unwrap().is_none());

  let stored = s.get_audit(saved.audit_id).await.unwrap().unwrap();
  assert_eq!(stored.version, 1);
  assert_eq!(stored.name, "2026 platform audit");
}

#[tokio::test]
async fn deleting_company_cascades_to_audit_data() {
  let s = store().await;
  let a = audit(&s).await;
  let custom = criterion(None, Some(a.audit_id), "Custom");
  s.insert_criteria(vec![custom.clone()]).await.unwrap();
  let ev = s.add_evidence(new_evidence(a.audit_id, "h1")).await.unwrap();
  s.add_link(new_link(a.audit_id, ev.evidence_id, custom.criterion_id, LinkStatus::Confirmed))
    .await
    .unwrap();

  assert!(s.delete_company(a.company_id).await.unwrap());
  assert!(s.get_audit(a.audit_id).await.unwrap().is_none());
  assert!(s.get_evidence(ev.evidence_id).await.unwrap().is_none());
  assert!(s.get_criterion(custom.criterion_id).await.unwrap().is_none());
  assert!(s.list_links(LinkQuery::audit(a.audit_id)).await.unwrap().is_empty());
}

// ─── Criteria & selection ────────────────────────────────────────────────────

#[tokio::test]
async fn criteria_scopes_separate_base_and_custom_nodes() {
  let s = store().await;
  let a = audit(&s).await;
  let root = criterion(None, None, "Delivery");
  let child = criterion(Some(root.criterion_id), None, "CI");
  let custom = criterion(Some(root.criterion_id), Some(a.audit_id), "Release trains");
  s.insert_criteria(vec![root.clone(), child.clone()]).await.unwrap();
  s.insert_criteria(vec![custom.clone()]).await.unwrap();

  let base = s.list_criteria(CriteriaScope::Base).await.unwrap();
  assert_eq!(base, vec![root.clone(), child.clone()]);

  let scoped = s.list_criteria(CriteriaScope::Audit(a.audit_id)).await.unwrap();
  assert_eq!(scoped.len(), 3);
  assert_eq!(scoped[2].criterion_id, custom.criterion_id);

  let only = s.list_criteria(CriteriaScope::CustomOnly(a.audit_id)).await.unwrap();
  assert_eq!(only, vec![custom]);
}

#[tokio::test]
async fn insert_criteria_is_atomic() {
  let s = store().await;
  let node = criterion(None, None, "Security");
  s.insert_criteria(vec![node.clone()]).await.unwrap();

  // The duplicate primary key aborts the whole batch.
  let fresh = criterion(None, None, "Observability");
  assert!(s.insert_criteria(vec![fresh.clone(), node]).await.is_err());
  assert!(s.get_criterion(fresh.criterion_id).await.unwrap().is_none());
}

#[tokio::test]
async fn update_criterion_replaces_content() {
  let s = store().await;
  let mut node = criterion(None, None, "Testing");
  s.insert_criteria(vec![node.clone()]).await.unwrap();

  node.maturity.advanced = "mutation testing in CI".into();
  assert!(s.update_criterion(node.clone()).await.unwrap());
  let fetched = s.get_criterion(node.criterion_id).await.unwrap().unwrap();
  assert_eq!(fetched.maturity.advanced, "mutation testing in CI");
}

#[tokio::test]
async fn selection_is_replaced_wholesale() {
  let s = store().await;
  let a = audit(&s).await;
  let one = criterion(None, None, "One");
  let two = criterion(None, None, "Two");
  s.insert_criteria(vec![one.clone(), two.clone()]).await.unwrap();

  s.set_selection(a.audit_id, vec![Selection {
    criterion_id:   one.criterion_id,
    expected_level: Some(MaturityLevel::Advanced),
  }])
  .await
  .unwrap();
  s.set_selection(a.audit_id, vec![Selection {
    criterion_id:   two.criterion_id,
    expected_level: None,
  }])
  .await
  .unwrap();

  let selection = s.get_selection(a.audit_id).await.unwrap();
  assert_eq!(selection, vec![Selection {
    criterion_id:   two.criterion_id,
    expected_level: None,
  }]);
}

// ─── Evidence & links ────────────────────────────────────────────────────────

#[tokio::test]
async fn evidence_round_trips_extracted_content() {
  let s = store().await;
  let a = audit(&s).await;
  let mut item = s.add_evidence(new_evidence(a.audit_id, "h1")).await.unwrap();
  assert_eq!(item.status, ExtractionStatus::Pending);

  item.begin_processing().unwrap();
  item
    .mark_extracted(
      ExtractedContent {
        text:     "--- page 1 ---\nWe deploy daily.".into(),
        segments: vec![Segment::Page {
          number: 1,
          text:   "We deploy daily.".into(),
        }],
      },
      Utc::now(),
    )
    .unwrap();
  assert!(s.update_evidence(item.clone()).await.unwrap());

  let fetched = s.get_evidence(item.evidence_id).await.unwrap().unwrap();
  assert_eq!(fetched.status, ExtractionStatus::Extracted);
  assert_eq!(fetched.content, item.content);
  assert!(fetched.processed_at.is_some());
}

#[tokio::test]
async fn find_by_hash_optionally_scopes_to_audit() {
  let s = store().await;
  let a = audit(&s).await;
  let b = audit(&s).await;
  s.add_evidence(new_evidence(a.audit_id, "same")).await.unwrap();
  s.add_evidence(new_evidence(b.audit_id, "same")).await.unwrap();
  s.add_evidence(new_evidence(b.audit_id, "other")).await.unwrap();

  let everywhere = s.find_evidence_by_hash("same".into(), None).await.unwrap();
  assert_eq!(everywhere.len(), 2);
  let in_a = s
    .find_evidence_by_hash("same".into(), Some(a.audit_id))
    .await
    .unwrap();
  assert_eq!(in_a.len(), 1);
  assert_eq!(in_a[0].audit_id, a.audit_id);
}

#[tokio::test]
async fn link_queries_combine_filters() {
  let s = store().await;
  let a = audit(&s).await;
  let c1 = criterion(None, None, "C1");
  let c2 = criterion(None, None, "C2");
  s.insert_criteria(vec![c1.clone(), c2.clone()]).await.unwrap();
  let ev = s.add_evidence(new_evidence(a.audit_id, "h")).await.unwrap();

  let confirmed = s
    .add_link(new_link(a.audit_id, ev.evidence_id, c1.criterion_id, LinkStatus::Confirmed))
    .await
    .unwrap();
  assert_eq!(confirmed.confirmed_by, Some(Actor::system()));
  s.add_link(new_link(a.audit_id, ev.evidence_id, c2.criterion_id, LinkStatus::Suggested))
    .await
    .unwrap();

  let all = s.list_links(LinkQuery::audit(a.audit_id)).await.unwrap();
  assert_eq!(all.len(), 2);
  let only = s
    .list_links(LinkQuery::audit(a.audit_id).confirmed())
    .await
    .unwrap();
  assert_eq!(only, vec![confirmed]);
  let by_criterion = s
    .list_links(LinkQuery::audit(a.audit_id).criterion(c2.criterion_id))
    .await
    .unwrap();
  assert_eq!(by_criterion.len(), 1);
  assert_eq!(by_criterion[0].status, LinkStatus::Suggested);
}

#[tokio::test]
async fn duplicate_link_pair_is_rejected() {
  let s = store().await;
  let a = audit(&s).await;
  let c = criterion(None, None, "C");
  s.insert_criteria(vec![c.clone()]).await.unwrap();
  let ev = s.add_evidence(new_evidence(a.audit_id, "h")).await.unwrap();

  s.add_link(new_link(a.audit_id, ev.evidence_id, c.criterion_id, LinkStatus::Suggested))
    .await
    .unwrap();
  assert!(
    s.add_link(new_link(a.audit_id, ev.evidence_id, c.criterion_id, LinkStatus::Confirmed))
      .await
      .is_err()
  );
}

#[tokio::test]
async fn deleting_evidence_removes_its_links() {
  let s = store().await;
  let a = audit(&s).await;
  let c = criterion(None, None, "C");
  s.insert_criteria(vec![c.clone()]).await.unwrap();
  let ev = s.add_evidence(new_evidence(a.audit_id, "h")).await.unwrap();
  let link = s
    .add_link(new_link(a.audit_id, ev.evidence_id, c.criterion_id, LinkStatus::Confirmed))
    .await
    .unwrap();

  assert!(s.delete_evidence(ev.evidence_id).await.unwrap());
  assert!(s.get_link(link.link_id).await.unwrap().is_none());
  assert!(!s.delete_evidence(ev.evidence_id).await.unwrap());
}

#[tokio::test]
async fn add_links_is_atomic() {
  let s = store().await;
  let a = audit(&s).await;
  let (c1, c2) = (criterion(None, None, "C1"), criterion(None, None, "C2"));
  s.insert_criteria(vec![c1.clone(), c2.clone()]).await.unwrap();
  let ev = s.add_evidence(new_evidence(a.audit_id, "h")).await.unwrap();

  let stored = s
    .add_links(vec![
      new_link(a.audit_id, ev.evidence_id, c1.criterion_id, LinkStatus::Suggested),
      new_link(a.audit_id, ev.evidence_id, c2.criterion_id, LinkStatus::Confirmed),
    ])
    .await
    .unwrap();
  assert_eq!(stored[0].criterion_id, c1.criterion_id);
  assert_eq!(stored[1].confirmed_by, Some(Actor::system()));

  // The second row repeats the first pair, so neither is kept.
  let other = criterion(None, None, "C3");
  s.insert_criteria(vec![other.clone()]).await.unwrap();
  assert!(
    s.add_links(vec![
      new_link(a.audit_id, ev.evidence_id, other.criterion_id, LinkStatus::Suggested),
      new_link(a.audit_id, ev.evidence_id, c1.criterion_id, LinkStatus::Suggested),
    ])
    .await
    .is_err()
  );
  let links = s
    .list_links(LinkQuery::audit(a.audit_id).criterion(other.criterion_id))
    .await
    .unwrap();
  assert!(links.is_empty());
}

// ─── Assessments ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn put_assessments_upserts() {
  let s = store().await;
  let a = audit(&s).await;
  let c = criterion(None, None, "C");
  s.insert_criteria(vec![c.clone()]).await.unwrap();

  let mut assessment =
    MaturityAssessment::unassessed(a.audit_id, c.criterion_id, Actor::system(), Utc::now());
  s.put_assessments(vec![assessment.clone()]).await.unwrap();

  assessment.set_override(HumanOverride {
    level:     MaturityLevel::Intermediate,
    rationale: "Observed the on-call handover".into(),
    actor:     Actor::new("lead"),
    at:        Utc::now(),
  });
  s.put_assessments(vec![assessment.clone()]).await.unwrap();

  let all = s.list_assessments(a.audit_id).await.unwrap();
  assert_eq!(all.len(), 1);
  assert_eq!(all[0].effective, Level::Intermediate);
  assert_eq!(all[0], assessment);

  let one = s
    .get_assessment(a.audit_id, c.criterion_id)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(one.human_override.map(|o| o.actor), Some(Actor::new("lead")));
}

#[tokio::test]
async fn audit_and_assessments_commit_together() {
  let s = store().await;
  let a = audit(&s).await;
  let c = criterion(None, None, "C");
  s.insert_criteria(vec![c.clone()]).await.unwrap();
  let mut assessment =
    MaturityAssessment::unassessed(a.audit_id, c.criterion_id, Actor::system(), Utc::now());
  s.put_assessments(vec![assessment.clone()]).await.unwrap();

  assessment.locked = true;
  let mut finalized = a.clone();
  finalized.state = AuditState::Finalized;
  let saved = s
    .update_audit_with_assessments(finalized, vec![assessment.clone()])
    .await
    .unwrap()
    .unwrap();
  assert_eq!(saved.version, 1);
  assert!(s.list_assessments(a.audit_id).await.unwrap()[0].locked);

  // A stale version writes neither the audit nor the assessments.
  assessment.locked = false;
  let mut stale = a;
  stale.state = AuditState::Scoring;
  assert!(
    s.update_audit_with_assessments(stale, vec![assessment])
      .await
      .unwrap()
      .is_none()
  );
  assert_eq!(
    s.get_audit(saved.audit_id).await.unwrap().unwrap().state,
    AuditState::Finalized
  );
  assert!(s.list_assessments(saved.audit_id).await.unwrap()[0].locked);
}

// ─── Questions ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn questions_track_their_answers() {
  let s = store().await;
  let a = audit(&s).await;
  let (c1, c2) = (criterion(None, None, "C1"), criterion(None, None, "C2"));
  s.insert_criteria(vec![c1.clone(), c2.clone()]).await.unwrap();

  let question = |criterion_id, text: &str| NewQuestion {
    audit_id: a.audit_id,
    criterion_id,
    text: text.into(),
    created_by: Actor::new("auditor"),
  };
  let stored = s
    .add_questions(vec![
      question(c1.criterion_id, "Who approves a release?"),
      question(c1.criterion_id, "How long does a build take?"),
      question(c2.criterion_id, "Where are runbooks kept?"),
    ])
    .await
    .unwrap();
  assert_eq!(stored.len(), 3);

  let answer = s
    .add_answer(NewAnswer {
      question_id: stored[0].question_id,
      text:        "The team lead".into(),
      answered_by: Actor::new("cto"),
    })
    .await
    .unwrap();

  let fetched = s.get_question(stored[0].question_id).await.unwrap().unwrap();
  assert_eq!(fetched.answers, 1);
  assert!(fetched.is_answered());
  assert_eq!(s.list_answers(stored[0].question_id).await.unwrap(), vec![answer]);

  let all = QuestionQuery::audit(a.audit_id);
  assert_eq!(s.list_questions(all).await.unwrap().len(), 3);
  let c1_open = s
    .list_questions(all.criterion(c1.criterion_id).unanswered())
    .await
    .unwrap();
  assert_eq!(c1_open.len(), 1);
  assert_eq!(c1_open[0].text, "How long does a build take?");

  s.delete_criteria(vec![c2.criterion_id]).await.unwrap();
  assert_eq!(s.list_questions(all).await.unwrap().len(), 2);
  assert!(s.delete_audit(a.audit_id).await.unwrap());
  assert!(s.get_question(stored[0].question_id).await.unwrap().is_none());
}

#[tokio::test]
async fn answer_to_unknown_question_is_rejected() {
  let s = store().await;
  assert!(
    s.add_answer(NewAnswer {
      question_id: Uuid::new_v4(),
      text:        "n/a".into(),
      answered_by: Actor::new("cto"),
    })
    .await
    .is_err()
  );
}
