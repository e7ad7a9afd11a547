//! Follow-up questions an auditor puts to the organisation, and the answers
//! that come back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Actor, Error, Result};

/// Longest answer accepted, in characters.
pub const MAX_ANSWER_CHARS: usize = 20_000;

/// Upper bound on questions kept from one generation call.
pub const MAX_GENERATED: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
  pub question_id:  Uuid,
  pub audit_id:     Uuid,
  pub criterion_id: Uuid,
  pub text:         String,
  pub created_by:   Actor,
  pub created_at:   DateTime<Utc>,
  /// Number of answers recorded so far.
  pub answers:      u32,
}

impl Question {
  pub fn is_answered(&self) -> bool { self.answers > 0 }
}

/// Input to [`crate::store::AuditStore::add_questions`].
#[derive(Debug, Clone)]
pub struct NewQuestion {
  pub audit_id:     Uuid,
  pub criterion_id: Uuid,
  pub text:         String,
  pub created_by:   Actor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
  pub answer_id:   Uuid,
  pub question_id: Uuid,
  pub text:        String,
  pub answered_by: Actor,
  pub answered_at: DateTime<Utc>,
}

/// Input to [`crate::store::AuditStore::add_answer`].
#[derive(Debug, Clone)]
pub struct NewAnswer {
  pub question_id: Uuid,
  pub text:        String,
  pub answered_by: Actor,
}

/// Trim generated questions, dropping blanks and repeats (case-insensitive)
/// and keeping at most [`MAX_GENERATED`].
pub fn tidy_questions(raw: Vec<String>) -> Vec<String> {
  let mut seen = std::collections::HashSet::new();
  raw
    .into_iter()
    .map(|q| q.trim().to_owned())
    .filter(|q| !q.is_empty() && seen.insert(q.to_lowercase()))
    .take(MAX_GENERATED)
    .collect()
}

/// An answer must say something and stay within [`MAX_ANSWER_CHARS`].
pub fn check_answer(text: &str) -> Result<()> {
  if text.trim().is_empty() {
    return Err(Error::invalid("answer text is empty"));
  }
  let chars = text.chars().count();
  if chars > MAX_ANSWER_CHARS {
    return Err(Error::invalid(format!(
      "answer is {chars} characters; the limit is {MAX_ANSWER_CHARS}"
    )));
  }
  Ok(())
}
