//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. Enumerations are stored as
//! their snake_case names. Structured fields (settings, extracted content,
//! overrides, breakdowns, id lists) are stored as compact JSON. UUIDs are
//! stored as hyphenated lowercase strings.

use std::str::FromStr;

use assay_core::{
  Actor,
  assessment::MaturityAssessment,
  audit::{Audit, Company, Selection},
  blob::ArtifactHandle,
  criterion::CriterionNode,
  evidence::EvidenceItem,
  link::EvidenceLink,
  question::{Answer, Question},
};
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn decode_opt_uuid(s: Option<&str>) -> Result<Option<Uuid>> {
  s.map(decode_uuid).transpose()
}

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn decode_opt_dt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  s.map(decode_dt).transpose()
}

/// Parse a snake_case enum column.
pub fn decode_enum<T: FromStr>(column: &'static str, s: &str) -> Result<T> {
  T::from_str(s).map_err(|_| Error::UnknownVariant {
    column,
    value: s.to_owned(),
  })
}

pub fn decode_opt_enum<T: FromStr>(
  column: &'static str,
  s: Option<&str>,
) -> Result<Option<T>> {
  s.map(|s| decode_enum(column, s)).transpose()
}

pub fn encode_json<T: Serialize>(value: &T) -> Result<String> {
  Ok(serde_json::to_string(value)?)
}

pub fn decode_json<T: DeserializeOwned>(s: &str) -> Result<T> {
  Ok(serde_json::from_str(s)?)
}

pub fn decode_opt_json<T: DeserializeOwned>(s: Option<&str>) -> Result<Option<T>> {
  s.map(decode_json).transpose()
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `companies` row.
pub struct RawCompany {
  pub company_id:  String,
  pub name:        String,
  pub description: Option<String>,
  pub sector:      Option<String>,
  pub created_at:  String,
}

impl RawCompany {
  pub const COLUMNS: &'static str = "company_id, name, description, sector, created_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      company_id:  row.get(0)?,
      name:        row.get(1)?,
      description: row.get(2)?,
      sector:      row.get(3)?,
      created_at:  row.get(4)?,
    })
  }

  pub fn into_company(self) -> Result<Company> {
    Ok(Company {
      company_id:  decode_uuid(&self.company_id)?,
      name:        self.name,
      description: self.description,
      sector:      self.sector,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from an `audits` row.
pub struct RawAudit {
  pub audit_id:     String,
  pub company_id:   String,
  pub name:         String,
  pub description:  Option<String>,
  pub state:        String,
  pub settings:     String,
  pub version:      i64,
  pub created_at:   String,
  pub updated_at:   String,
  pub finalized_at: Option<String>,
}

impl RawAudit {
  pub const COLUMNS: &'static str = "audit_id, company_id, name, description, state, \
                             settings, version, created_at, updated_at, \
                             finalized_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      audit_id:     row.get(0)?,
      company_id:   row.get(1)?,
      name:         row.get(2)?,
      description:  row.get(3)?,
      state:        row.get(4)?,
      settings:     row.get(5)?,
      version:      row.get(6)?,
      created_at:   row.get(7)?,
      updated_at:   row.get(8)?,
      finalized_at: row.get(9)?,
    })
  }

  pub fn into_audit(self) -> Result<Audit> {
    Ok(Audit {
      audit_id:     decode_uuid(&self.audit_id)?,
      company_id:   decode_uuid(&self.company_id)?,
      name:         self.name,
      description:  self.description,
      state:        decode_enum("state", &self.state)?,
      settings:     decode_json(&self.settings)?,
      version:      self.version.max(0) as u64,
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
      finalized_at: decode_opt_dt(self.finalized_at.as_deref())?,
    })
  }
}

/// Raw strings read directly from a `criteria` row.
pub struct RawCriterion {
  pub criterion_id: String,
  pub parent_id:    Option<String>,
  pub children:     String,
  pub title:        String,
  pub description:  String,
  pub section:      Option<String>,
  pub maturity:     String,
  pub audit_id:     Option<String>,
  pub created_at:   String,
}

impl RawCriterion {
  pub const COLUMNS: &'static str = "criterion_id, parent_id, children, title, \
                             description, section, maturity, audit_id, \
                             created_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      criterion_id: row.get(0)?,
      parent_id:    row.get(1)?,
      children:     row.get(2)?,
      title:        row.get(3)?,
      description:  row.get(4)?,
      section:      row.get(5)?,
      maturity:     row.get(6)?,
      audit_id:     row.get(7)?,
      created_at:   row.get(8)?,
    })
  }

  pub fn into_node(self) -> Result<CriterionNode> {
    Ok(CriterionNode {
      criterion_id: decode_uuid(&self.criterion_id)?,
      parent_id:    decode_opt_uuid(self.parent_id.as_deref())?,
      children:     decode_json(&self.children)?,
      title:        self.title,
      description:  self.description,
      section:      self.section,
      maturity:     decode_json(&self.maturity)?,
      audit_id:     decode_opt_uuid(self.audit_id.as_deref())?,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `selections` row.
pub struct RawSelection {
  pub criterion_id:   String,
  pub expected_level: Option<String>,
}

impl RawSelection {
  pub fn into_selection(self) -> Result<Selection> {
    Ok(Selection {
      criterion_id:   decode_uuid(&self.criterion_id)?,
      expected_level: decode_opt_enum(
        "expected_level",
        self.expected_level.as_deref(),
      )?,
    })
  }
}

/// Raw strings read directly from an `evidence` row.
pub struct RawEvidence {
  pub evidence_id:  String,
  pub audit_id:     String,
  pub artifact:     String,
  pub filename:     Option<String>,
  pub content_hash: String,
  pub size_bytes:   i64,
  pub media_kind:   String,
  pub status:       String,
  pub content:      Option<String>,
  pub failure:      Option<String>,
  pub uploaded_by:  String,
  pub uploaded_at:  String,
  pub processed_at: Option<String>,
}

impl RawEvidence {
  pub const COLUMNS: &'static str = "evidence_id, audit_id, artifact, filename, \
                             content_hash, size_bytes, media_kind, status, \
                             content, failure, uploaded_by, uploaded_at, \
                             processed_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      evidence_id:  row.get(0)?,
      audit_id:     row.get(1)?,
      artifact:     row.get(2)?,
      filename:     row.get(3)?,
      content_hash: row.get(4)?,
      size_bytes:   row.get(5)?,
      media_kind:   row.get(6)?,
      status:       row.get(7)?,
      content:      row.get(8)?,
      failure:      row.get(9)?,
      uploaded_by:  row.get(10)?,
      uploaded_at:  row.get(11)?,
      processed_at: row.get(12)?,
    })
  }

  pub fn into_evidence(self) -> Result<EvidenceItem> {
    Ok(EvidenceItem {
      evidence_id:  decode_uuid(&self.evidence_id)?,
      audit_id:     decode_uuid(&self.audit_id)?,
      artifact:     ArtifactHandle::new(self.artifact),
      filename:     self.filename,
      content_hash: self.content_hash,
      size_bytes:   self.size_bytes.max(0) as u64,
      media_kind:   decode_enum("media_kind", &self.media_kind)?,
      status:       decode_enum("status", &self.status)?,
      content:      decode_opt_json(self.content.as_deref())?,
      failure:      decode_opt_json(self.failure.as_deref())?,
      uploaded_by:  Actor::new(self.uploaded_by),
      uploaded_at:  decode_dt(&self.uploaded_at)?,
      processed_at: decode_opt_dt(self.processed_at.as_deref())?,
    })
  }
}

/// Raw strings read directly from a `links` row.
pub struct RawLink {
  pub link_id:      String,
  pub audit_id:     String,
  pub evidence_id:  String,
  pub criterion_id: String,
  pub weight:       f64,
  pub level_hint:   Option<String>,
  pub origin:       String,
  pub status:       String,
  pub created_by:   String,
  pub created_at:   String,
  pub confirmed_by: Option<String>,
  pub confirmed_at: Option<String>,
}

impl RawLink {
  pub const COLUMNS: &'static str = "link_id, audit_id, evidence_id, criterion_id, \
                             weight, level_hint, origin, status, created_by, \
                             created_at, confirmed_by, confirmed_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      link_id:      row.get(0)?,
      audit_id:     row.get(1)?,
      evidence_id:  row.get(2)?,
      criterion_id: row.get(3)?,
      weight:       row.get(4)?,
      level_hint:   row.get(5)?,
      origin:       row.get(6)?,
      status:       row.get(7)?,
      created_by:   row.get(8)?,
      created_at:   row.get(9)?,
      confirmed_by: row.get(10)?,
      confirmed_at: row.get(11)?,
    })
  }

  pub fn into_link(self) -> Result<EvidenceLink> {
    Ok(EvidenceLink {
      link_id:      decode_uuid(&self.link_id)?,
      audit_id:     decode_uuid(&self.audit_id)?,
      evidence_id:  decode_uuid(&self.evidence_id)?,
      criterion_id: decode_uuid(&self.criterion_id)?,
      weight:       self.weight as f32,
      level_hint:   decode_opt_enum("level_hint", self.level_hint.as_deref())?,
      origin:       decode_enum("origin", &self.origin)?,
      status:       decode_enum("status", &self.status)?,
      created_by:   Actor::new(self.created_by),
      created_at:   decode_dt(&self.created_at)?,
      confirmed_by: self.confirmed_by.map(Actor::new),
      confirmed_at: decode_opt_dt(self.confirmed_at.as_deref())?,
    })
  }
}

/// Raw strings read directly from an `assessments` row.
pub struct RawAssessment {
  pub audit_id:           String,
  pub criterion_id:       String,
  pub computed:           String,
  pub direct:             String,
  pub rolled_up:          Option<String>,
  pub human_override:     Option<String>,
  pub effective:          String,
  pub needs_review:       bool,
  pub rationale:          String,
  pub breakdown:          String,
  pub contributing_links: String,
  pub locked:             bool,
  pub modified_by:        String,
  pub modified_at:        String,
}

impl RawAssessment {
  pub const COLUMNS: &'static str = "audit_id, criterion_id, computed, direct, \
                             rolled_up, human_override, effective, \
                             needs_review, rationale, breakdown, \
                             contributing_links, locked, modified_by, \
                             modified_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      audit_id:           row.get(0)?,
      criterion_id:       row.get(1)?,
      computed:           row.get(2)?,
      direct:             row.get(3)?,
      rolled_up:          row.get(4)?,
      human_override:     row.get(5)?,
      effective:          row.get(6)?,
      needs_review:       row.get(7)?,
      rationale:          row.get(8)?,
      breakdown:          row.get(9)?,
      contributing_links: row.get(10)?,
      locked:             row.get(11)?,
      modified_by:        row.get(12)?,
      modified_at:        row.get(13)?,
    })
  }

  pub fn into_assessment(self) -> Result<MaturityAssessment> {
    Ok(MaturityAssessment {
      audit_id:           decode_uuid(&self.audit_id)?,
      criterion_id:       decode_uuid(&self.criterion_id)?,
      computed:           decode_enum("computed", &self.computed)?,
      direct:             decode_enum("direct", &self.direct)?,
      rolled_up:          decode_opt_enum("rolled_up", self.rolled_up.as_deref())?,
      human_override:     decode_opt_json(self.human_override.as_deref())?,
      effective:          decode_enum("effective", &self.effective)?,
      needs_review:       self.needs_review,
      rationale:          self.rationale,
      breakdown:          decode_json(&self.breakdown)?,
      contributing_links: decode_json(&self.contributing_links)?,
      locked:             self.locked,
      modified_by:        Actor::new(self.modified_by),
      modified_at:        decode_dt(&self.modified_at)?,
    })
  }
}

/// Raw strings read directly from a `questions` row, plus its answer count.
pub struct RawQuestion {
  pub question_id:  String,
  pub audit_id:     String,
  pub criterion_id: String,
  pub text:         String,
  pub created_by:   String,
  pub created_at:   String,
  pub answers:      i64,
}

impl RawQuestion {
  /// Expects the `questions` table aliased as `q`.
  pub const COLUMNS: &'static str = "q.question_id, q.audit_id, q.criterion_id, q.text, \
                             q.created_by, q.created_at, \
                             (SELECT COUNT(*) FROM answers a WHERE a.question_id = q.question_id)";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      question_id:  row.get(0)?,
      audit_id:     row.get(1)?,
      criterion_id: row.get(2)?,
      text:         row.get(3)?,
      created_by:   row.get(4)?,
      created_at:   row.get(5)?,
      answers:      row.get(6)?,
    })
  }

  pub fn into_question(self) -> Result<Question> {
    Ok(Question {
      question_id:  decode_uuid(&self.question_id)?,
      audit_id:     decode_uuid(&self.audit_id)?,
      criterion_id: decode_uuid(&self.criterion_id)?,
      text:         self.text,
      created_by:   Actor::new(self.created_by),
      created_at:   decode_dt(&self.created_at)?,
      answers:      u32::try_from(self.answers).unwrap_or(u32::MAX),
    })
  }
}

/// Raw strings read directly from an `answers` row.
pub struct RawAnswer {
  pub answer_id:   String,
  pub question_id: String,
  pub text:        String,
  pub answered_by: String,
  pub answered_at: String,
}

impl RawAnswer {
  pub const COLUMNS: &'static str = "answer_id, question_id, text, answered_by, answered_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      answer_id:   row.get(0)?,
      question_id: row.get(1)?,
      text:        row.get(2)?,
      answered_by: row.get(3)?,
      answered_at: row.get(4)?,
    })
  }

  pub fn into_answer(self) -> Result<Answer> {
    Ok(Answer {
      answer_id:   decode_uuid(&self.answer_id)?,
      question_id: decode_uuid(&self.question_id)?,
      text:        self.text,
      answered_by: Actor::new(self.answered_by),
      answered_at: decode_dt(&self.answered_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use assay_core::{audit::AuditState, criterion::Level};

  use super::*;

  #[test]
  fn enums_decode_from_their_snake_case_names() {
    let state: AuditState = decode_enum("state", "evidence_collection").unwrap();
    assert_eq!(state, AuditState::EvidenceCollection);
    assert_eq!(AuditState::CriteriaSelected.as_ref(), "criteria_selected");
    let level: Level = decode_enum("computed", "unassessed").unwrap();
    assert_eq!(level, Level::Unassessed);
  }

  #[test]
  fn unknown_enum_names_the_column() {
    let err = decode_enum::<AuditState>("state", "paused").unwrap_err();
    assert!(matches!(err, Error::UnknownVariant { column: "state", .. }));
  }

  #[test]
  fn timestamps_survive_rfc3339() {
    let now = Utc::now();
    assert_eq!(decode_dt(&encode_dt(now)).unwrap(), now);
  }
}
