//! Follow-up questions for the organisation under audit.
//!
//! The analysis service drafts questions about one criterion from the
//! evidence confirmed against it. Questions and their answers are a record
//! of the audit conversation; they never feed scoring.

use assay_core::{
  Actor, Error, Result,
  analysis::AnalysisService,
  blob::BlobStore,
  question::{Answer, NewAnswer, NewQuestion, Question, check_answer, tidy_questions},
  store::{AuditStore, LinkQuery, QuestionQuery},
};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{Engine, check_in_scope};

impl<S, B, A> Engine<S, B, A>
where
  S: AuditStore,
  B: BlobStore,
  A: AnalysisService,
{
  /// Draft and store questions about an in-scope criterion.
  ///
  /// The analysis call runs without the audit lock; an outage stores
  /// nothing. Blank and repeated questions are dropped.
  #[instrument(skip(self))]
  pub async fn generate_questions(
    &self,
    audit_id: Uuid,
    criterion_id: Uuid,
    actor: &Actor,
  ) -> Result<Vec<Question>> {
    self.load_audit(audit_id).await?.ensure_unlocked()?;
    let taxonomy = self.audit_taxonomy(audit_id).await?;
    let scope = self.scope_of(audit_id, &taxonomy).await?;
    check_in_scope(audit_id, &taxonomy, &scope, criterion_id)?;
    let reference = taxonomy.get_node(criterion_id)?.reference_text();
    let evidence = self.criterion_evidence(audit_id, criterion_id).await?;

    let raw = self
      .gate
      .run(self.analysis.generate_questions(&reference, &evidence))
      .await?;
    let texts = tidy_questions(raw);
    debug!(
      %criterion_id,
      evidence_chars = evidence.len(),
      kept = texts.len(),
      "questions drafted"
    );
    if texts.is_empty() {
      return Ok(Vec::new());
    }

    let _guard = self.locks.lock(audit_id).await;
    self.load_audit(audit_id).await?.ensure_unlocked()?;
    self.ensure_in_scope(audit_id, criterion_id).await?;
    let questions = self
      .store
      .add_questions(
        texts
          .into_iter()
          .map(|text| NewQuestion {
            audit_id,
            criterion_id,
            text,
            created_by: actor.clone(),
          })
          .collect(),
      )
      .await
      .map_err(Error::store)?;
    info!(%audit_id, %criterion_id, %actor, count = questions.len(), "questions stored");
    Ok(questions)
  }

  /// Extracted text of the evidence confirmed against a criterion, one block
  /// per item.
  async fn criterion_evidence(&self, audit_id: Uuid, criterion_id: Uuid) -> Result<String> {
    let links = self
      .store
      .list_links(LinkQuery::audit(audit_id).criterion(criterion_id).confirmed())
      .await
      .map_err(Error::store)?;
    let mut blocks = Vec::with_capacity(links.len());
    for link in links {
      let item = self
        .store
        .get_evidence(link.evidence_id)
        .await
        .map_err(Error::store)?;
      if let Some(item) = item
        && let Some(text) = item.text()
      {
        let name = item.filename.as_deref().unwrap_or("untitled");
        blocks.push(format!("[{name}]\n{text}"));
      }
    }
    Ok(blocks.join("\n\n"))
  }

  pub async fn get_question(&self, question_id: Uuid) -> Result<Question> {
    self
      .store
      .get_question(question_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::not_found("question", question_id))
  }

  /// Questions of one audit, optionally narrowed by criterion or to those
  /// still unanswered.
  pub async fn list_questions(&self, audit_id: Uuid, query: QuestionQuery) -> Result<Vec<Question>> {
    self.load_audit(audit_id).await?;
    self
      .store
      .list_questions(QuestionQuery { audit_id, ..query })
      .await
      .map_err(Error::store)
  }

  /// Record an answer. A question may be answered more than once.
  #[instrument(skip(self, text))]
  pub async fn answer_question(
    &self,
    question_id: Uuid,
    text: String,
    actor: &Actor,
  ) -> Result<Answer> {
    check_answer(&text)?;
    let audit_id = self.get_question(question_id).await?.audit_id;
    let _guard = self.locks.lock(audit_id).await;
    self.load_audit(audit_id).await?.ensure_unlocked()?;
    self.get_question(question_id).await?;

    let answer = self
      .store
      .add_answer(NewAnswer {
        question_id,
        text,
        answered_by: actor.clone(),
      })
      .await
      .map_err(Error::store)?;
    info!(%question_id, answer_id = %answer.answer_id, %actor, "question answered");
    Ok(answer)
  }

  pub async fn list_answers(&self, question_id: Uuid) -> Result<Vec<Answer>> {
    self.get_question(question_id).await?;
    self
      .store
      .list_answers(question_id)
      .await
      .map_err(Error::store)
  }
}

#[cfg(test)]
mod tests {
  use assay_core::audit::AuditState;

  use crate::testing::*;

  use super::*;

  #[tokio::test]
  async fn without_evidence_questions_ask_for_some() {
    let h = Harness::new().await;
    let audit = h.audit_in(AuditState::EvidenceCollection).await;

    let questions = h
      .engine
      .generate_questions(audit.audit_id, h.ci, &h.actor)
      .await
      .unwrap();
    assert_eq!(questions.len(), 2);
    assert!(questions[0].text.starts_with("What evidence can you share"));
    assert!(questions.iter().all(|q| q.criterion_id == h.ci && !q.is_answered()));
  }

  #[tokio::test]
  async fn confirmed_evidence_steers_the_questions() {
    let h = Harness::new().await;
    let audit = h.audit_in(AuditState::EvidenceCollection).await;
    let item = h.upload_text(audit.audit_id, "ci.txt", CI_NOTES).await;
    h.engine
      .link_evidence(item.evidence_id, h.ci, 0.8, None, &h.actor)
      .await
      .unwrap();

    let questions = h
      .engine
      .generate_questions(audit.audit_id, h.ci, &h.actor)
      .await
      .unwrap();
    let texts: Vec<&str> = questions.iter().map(|q| q.text.as_str()).collect();
    assert_eq!(texts, vec![
      "How is Continuous integration measured?",
      "What would move Continuous integration to the next level?",
    ]);
  }

  #[tokio::test]
  async fn out_of_scope_criterion_is_rejected() {
    let h = Harness::new().await;
    let audit = h.audit_in(AuditState::EvidenceCollection).await;
    let err = h
      .engine
      .generate_questions(audit.audit_id, h.docs, &h.actor)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }

  #[tokio::test]
  async fn analysis_outage_stores_no_questions() {
    let h = Harness::new().await;
    let audit = h.audit_in(AuditState::EvidenceCollection).await;
    h.analysis.set_unavailable(true);

    let err = h
      .engine
      .generate_questions(audit.audit_id, h.ci, &h.actor)
      .await
      .unwrap_err();
    assert!(err.is_retryable());
    let stored = h
      .engine
      .list_questions(audit.audit_id, QuestionQuery::audit(audit.audit_id))
      .await
      .unwrap();
    assert!(stored.is_empty());
  }

  #[tokio::test]
  async fn answering_moves_a_question_out_of_the_open_list() {
    let h = Harness::new().await;
    let audit = h.audit_in(AuditState::EvidenceCollection).await;
    let questions = h
      .engine
      .generate_questions(audit.audit_id, h.ci, &h.actor)
      .await
      .unwrap();

    let err = h
      .engine
      .answer_question(questions[0].question_id, "  ".into(), &h.actor)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let lead = Actor::new("lead@acme.example");
    let answer = h
      .engine
      .answer_question(questions[0].question_id, "Every merge runs the suite".into(), &lead)
      .await
      .unwrap();
    assert_eq!(answer.answered_by, lead);

    let open = h
      .engine
      .list_questions(audit.audit_id, QuestionQuery::audit(audit.audit_id).unanswered())
      .await
      .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].question_id, questions[1].question_id);
    assert_eq!(
      h.engine.list_answers(questions[0].question_id).await.unwrap(),
      vec![answer]
    );
  }

  #[tokio::test]
  async fn archived_audit_takes_no_answers() {
    let h = Harness::new().await;
    let audit = h.audit_in(AuditState::EvidenceCollection).await;
    let questions = h
      .engine
      .generate_questions(audit.audit_id, h.ci, &h.actor)
      .await
      .unwrap();
    h.engine.archive(audit.audit_id, &h.actor).await.unwrap();

    let err = h
      .engine
      .answer_question(questions[0].question_id, "too late".into(), &h.actor)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::AuditLocked { .. }));
    assert!(matches!(
      h.engine.list_answers(Uuid::new_v4()).await,
      Err(Error::NotFound { kind: "question", .. })
    ));
  }
}
