//! [`SqliteStore`] is the SQLite implementation of [`AuditStore`].

use std::path::Path;

use assay_core::{
  assessment::MaturityAssessment,
  audit::{Audit, AuditState, Company, NewAudit, NewCompany, Selection},
  criterion::CriterionNode,
  evidence::{EvidenceItem, ExtractionStatus, NewEvidence},
  link::{EvidenceLink, LinkStatus, NewLink},
  question::{Answer, NewAnswer, NewQuestion, Question},
  store::{AuditStore, CriteriaScope, LinkQuery, QuestionQuery},
};
use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    RawAnswer, RawAssessment, RawAudit, RawCompany, RawCriterion, RawEvidence,
    RawLink, RawQuestion, RawSelection, encode_dt, encode_json, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// An Assay audit store backed by a single SQLite file.
///
/// The inner connection is reference-counted, so clones share it.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn exists(&self, sql: &'static str, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);
    let found = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(sql, rusqlite::params![id_str], |_| Ok(()))
            .optional()?
            .is_some(),
        )
      })
      .await?;
    Ok(found)
  }
}

/// Bound values for one `criteria` row.
struct CriterionParams {
  criterion_id: String,
  parent_id:    Option<String>,
  children:     String,
  title:        String,
  description:  String,
  section:      Option<String>,
  maturity:     String,
  audit_id:     Option<String>,
  created_at:   String,
}

impl CriterionParams {
  fn new(node: &CriterionNode) -> Result<Self> {
    Ok(Self {
      criterion_id: encode_uuid(node.criterion_id),
      parent_id:    node.parent_id.map(encode_uuid),
      children:     encode_json(&node.children)?,
      title:        node.title.clone(),
      description:  node.description.clone(),
      section:      node.section.clone(),
      maturity:     encode_json(&node.maturity)?,
      audit_id:     node.audit_id.map(encode_uuid),
      created_at:   encode_dt(node.created_at),
    })
  }
}

/// Bound values for one `assessments` row.
struct AssessmentParams {
  audit_id:           String,
  criterion_id:       String,
  computed:           String,
  direct:             String,
  rolled_up:          Option<String>,
  human_override:     Option<String>,
  effective:          String,
  needs_review:       bool,
  rationale:          String,
  breakdown:          String,
  contributing_links: String,
  locked:             bool,
  modified_by:        String,
  modified_at:        String,
}

impl AssessmentParams {
  fn new(a: &MaturityAssessment) -> Result<Self> {
    Ok(Self {
      audit_id:           encode_uuid(a.audit_id),
      criterion_id:       encode_uuid(a.criterion_id),
      computed:           a.computed.as_ref().to_owned(),
      direct:             a.direct.as_ref().to_owned(),
      rolled_up:          a.rolled_up.map(|l| l.as_ref().to_owned()),
      human_override:     a.human_override.as_ref().map(encode_json).transpose()?,
      effective:          a.effective.as_ref().to_owned(),
      needs_review:       a.needs_review,
      rationale:          a.rationale.clone(),
      breakdown:          encode_json(&a.breakdown)?,
      contributing_links: encode_json(&a.contributing_links)?,
      locked:             a.locked,
      modified_by:        a.modified_by.as_str().to_owned(),
      modified_at:        encode_dt(a.modified_at),
    })
  }

  fn upsert(&self, conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute(
      "INSERT INTO assessments (
         audit_id, criterion_id, computed, direct, rolled_up,
         human_override, effective, needs_review, rationale, breakdown,
         contributing_links, locked, modified_by, modified_at
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
       ON CONFLICT (audit_id, criterion_id) DO UPDATE SET
         computed = excluded.computed,
         direct = excluded.direct,
         rolled_up = excluded.rolled_up,
         human_override = excluded.human_override,
         effective = excluded.effective,
         needs_review = excluded.needs_review,
         rationale = excluded.rationale,
         breakdown = excluded.breakdown,
         contributing_links = excluded.contributing_links,
         locked = excluded.locked,
         modified_by = excluded.modified_by,
         modified_at = excluded.modified_at",
      rusqlite::params![
        self.audit_id,
        self.criterion_id,
        self.computed,
        self.direct,
        self.rolled_up,
        self.human_override,
        self.effective,
        self.needs_review,
        self.rationale,
        self.breakdown,
        self.contributing_links,
        self.locked,
        self.modified_by,
        self.modified_at,
      ],
    )?;
    Ok(())
  }
}

/// Bound values for a versioned `audits` update.
struct AuditParams {
  audit_id:     String,
  expected:     i64,
  name:         String,
  description:  Option<String>,
  state:        String,
  settings:     String,
  updated_at:   String,
  finalized_at: Option<String>,
}

impl AuditParams {
  fn new(audit: &Audit) -> Result<Self> {
    Ok(Self {
      audit_id:     encode_uuid(audit.audit_id),
      expected:     audit.version as i64,
      name:         audit.name.clone(),
      description:  audit.description.clone(),
      state:        audit.state.as_ref().to_owned(),
      settings:     encode_json(&audit.settings)?,
      updated_at:   encode_dt(audit.updated_at),
      finalized_at: audit.finalized_at.map(encode_dt),
    })
  }

  /// Returns the number of rows changed: 0 when the version is stale.
  fn write(&self, conn: &rusqlite::Connection) -> rusqlite::Result<usize> {
    conn.execute(
      "UPDATE audits SET
         name = ?3, description = ?4, state = ?5, settings = ?6,
         updated_at = ?7, finalized_at = ?8, version = version + 1
       WHERE audit_id = ?1 AND version = ?2",
      rusqlite::params![
        self.audit_id,
        self.expected,
        self.name,
        self.description,
        self.state,
        self.settings,
        self.updated_at,
        self.finalized_at,
      ],
    )
  }
}

/// Bound values for one `links` row.
struct LinkParams {
  link_id:      String,
  audit_id:     String,
  evidence_id:  String,
  criterion_id: String,
  weight:       f64,
  level_hint:   Option<String>,
  origin:       String,
  status:       String,
  created_by:   String,
  created_at:   String,
  confirmed_by: Option<String>,
  confirmed_at: Option<String>,
}

impl LinkParams {
  fn new(link: &EvidenceLink) -> Self {
    Self {
      link_id:      encode_uuid(link.link_id),
      audit_id:     encode_uuid(link.audit_id),
      evidence_id:  encode_uuid(link.evidence_id),
      criterion_id: encode_uuid(link.criterion_id),
      weight:       f64::from(link.weight),
      level_hint:   link.level_hint.map(|l| l.as_ref().to_owned()),
      origin:       link.origin.as_ref().to_owned(),
      status:       link.status.as_ref().to_owned(),
      created_by:   link.created_by.as_str().to_owned(),
      created_at:   encode_dt(link.created_at),
      confirmed_by: link.confirmed_by.as_ref().map(|a| a.as_str().to_owned()),
      confirmed_at: link.confirmed_at.map(encode_dt),
    }
  }

  fn insert(&self, conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute(
      "INSERT INTO links (
         link_id, audit_id, evidence_id, criterion_id, weight, level_hint,
         origin, status, created_by, created_at, confirmed_by, confirmed_at
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
      rusqlite::params![
        self.link_id,
        self.audit_id,
        self.evidence_id,
        self.criterion_id,
        self.weight,
        self.level_hint,
        self.origin,
        self.status,
        self.created_by,
        self.created_at,
        self.confirmed_by,
        self.confirmed_at,
      ],
    )?;
    Ok(())
  }
}

/// A confirmed link is confirmed by its creator at creation time.
fn new_link(input: NewLink, now: chrono::DateTime<Utc>) -> EvidenceLink {
  let confirmed = input.status == LinkStatus::Confirmed;
  EvidenceLink {
    link_id:      Uuid::new_v4(),
    audit_id:     input.audit_id,
    evidence_id:  input.evidence_id,
    criterion_id: input.criterion_id,
    weight:       input.weight,
    level_hint:   input.level_hint,
    origin:       input.origin,
    status:       input.status,
    confirmed_by: confirmed.then(|| input.created_by.clone()),
    confirmed_at: confirmed.then_some(now),
    created_by:   input.created_by,
    created_at:   now,
  }
}

// ─── AuditStore impl ─────────────────────────────────────────────────────────

impl AuditStore for SqliteStore {
  type Error = Error;

  // ── Companies ─────────────────────────────────────────────────────────────

  async fn add_company(&self, input: NewCompany) -> Result<Company> {
    let company = Company {
      company_id:  Uuid::new_v4(),
      name:        input.name,
      description: input.description,
      sector:      input.sector,
      created_at:  Utc::now(),
    };

    let id_str = encode_uuid(company.company_id);
    let name = company.name.clone();
    let description = company.description.clone();
    let sector = company.sector.clone();
    let at_str = encode_dt(company.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO companies (company_id, name, description, sector, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![id_str, name, description, sector, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(company)
  }

  async fn get_company(&self, company_id: Uuid) -> Result<Option<Company>> {
    let id_str = encode_uuid(company_id);

    let raw: Option<RawCompany> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM companies WHERE company_id = ?1",
          RawCompany::COLUMNS
        );
        Ok(
          conn
            .query_row(&sql, rusqlite::params![id_str], RawCompany::from_row)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCompany::into_company).transpose()
  }

  async fn list_companies(&self) -> Result<Vec<Company>> {
    let raws: Vec<RawCompany> = self
      .conn
      .call(|conn| {
        let sql = format!(
          "SELECT {} FROM companies ORDER BY created_at, rowid",
          RawCompany::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], RawCompany::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCompany::into_company).collect()
  }

  async fn delete_company(&self, company_id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(company_id);
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM companies WHERE company_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;
    Ok(removed > 0)
  }

  // ── Audits ────────────────────────────────────────────────────────────────

  async fn add_audit(&self, input: NewAudit) -> Result<Audit> {
    if !self
      .exists("SELECT 1 FROM companies WHERE company_id = ?1", input.company_id)
      .await?
    {
      return Err(Error::CompanyNotFound(input.company_id));
    }

    let now = Utc::now();
    let audit = Audit {
      audit_id: Uuid::new_v4(),
      company_id: input.company_id,
      name: input.name,
      description: input.description,
      state: AuditState::Draft,
      settings: input.settings.unwrap_or_default(),
      version: 0,
      created_at: now,
      updated_at: now,
      finalized_at: None,
    };

    let id_str = encode_uuid(audit.audit_id);
    let company_str = encode_uuid(audit.company_id);
    let name = audit.name.clone();
    let description = audit.description.clone();
    let state_str = audit.state.as_ref().to_owned();
    let settings_str = encode_json(&audit.settings)?;
    let at_str = encode_dt(now);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO audits (
             audit_id, company_id, name, description, state, settings,
             version, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
          rusqlite::params![
            id_str,
            company_str,
            name,
            description,
            state_str,
            settings_str,
            at_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(audit)
  }

  async fn get_audit(&self, audit_id: Uuid) -> Result<Option<Audit>> {
    let id_str = encode_uuid(audit_id);

    let raw: Option<RawAudit> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {} FROM audits WHERE audit_id = ?1", RawAudit::COLUMNS);
        Ok(
          conn
            .query_row(&sql, rusqlite::params![id_str], RawAudit::from_row)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAudit::into_audit).transpose()
  }

  async fn list_audits(&self, company_id: Option<Uuid>) -> Result<Vec<Audit>> {
    let company_str = company_id.map(encode_uuid);

    let raws: Vec<RawAudit> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM audits
           WHERE (?1 IS NULL OR company_id = ?1)
           ORDER BY created_at, rowid",
          RawAudit::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![company_str], RawAudit::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAudit::into_audit).collect()
  }

  async fn update_audit(&self, audit: Audit) -> Result<Option<Audit>> {
    let params = AuditParams::new(&audit)?;
    let changed = self
      .conn
      .call(move |conn| Ok(params.write(conn)?))
      .await?;

    if changed == 0 {
      return Ok(None);
    }
    Ok(Some(Audit {
      version: audit.version + 1,
      ..audit
    }))
  }

  async fn update_audit_with_assessments(
    &self,
    audit: Audit,
    assessments: Vec<MaturityAssessment>,
  ) -> Result<Option<Audit>> {
    let params = AuditParams::new(&audit)?;
    let rows = assessments
      .iter()
      .map(AssessmentParams::new)
      .collect::<Result<Vec<_>>>()?;

    let written = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if params.write(&tx)? == 0 {
          return Ok(false);
        }
        for r in &rows {
          r.upsert(&tx)?;
        }
        tx.commit()?;
        Ok(true)
      })
      .await?;

    if !written {
      return Ok(None);
    }
    Ok(Some(Audit {
      version: audit.version + 1,
      ..audit
    }))
  }

  async fn delete_audit(&self, audit_id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(audit_id);
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM audits WHERE audit_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;
    Ok(removed > 0)
  }

  // ── Criteria ──────────────────────────────────────────────────────────────

  async fn insert_criteria(&self, nodes: Vec<CriterionNode>) -> Result<()> {
    let rows = nodes
      .iter()
      .map(CriterionParams::new)
      .collect::<Result<Vec<_>>>()?;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for r in rows {
          tx.execute(
            "INSERT INTO criteria (
               criterion_id, parent_id, children, title, description,
               section, maturity, audit_id, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
              r.criterion_id,
              r.parent_id,
              r.children,
              r.title,
              r.description,
              r.section,
              r.maturity,
              r.audit_id,
              r.created_at,
            ],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_criterion(&self, criterion_id: Uuid) -> Result<Option<CriterionNode>> {
    let id_str = encode_uuid(criterion_id);

    let raw: Option<RawCriterion> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM criteria WHERE criterion_id = ?1",
          RawCriterion::COLUMNS
        );
        Ok(
          conn
            .query_row(&sql, rusqlite::params![id_str], RawCriterion::from_row)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCriterion::into_node).transpose()
  }

  async fn list_criteria(&self, scope: CriteriaScope) -> Result<Vec<CriterionNode>> {
    let (filter, audit_str) = match scope {
      CriteriaScope::Base => ("audit_id IS NULL", None),
      CriteriaScope::Audit(id) => ("audit_id IS NULL OR audit_id = ?1", Some(encode_uuid(id))),
      CriteriaScope::CustomOnly(id) => ("audit_id = ?1", Some(encode_uuid(id))),
    };

    let raws: Vec<RawCriterion> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM criteria WHERE {filter} ORDER BY rowid",
          RawCriterion::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = match audit_str {
          Some(a) => stmt
            .query_map(rusqlite::params![a], RawCriterion::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
          None => stmt
            .query_map([], RawCriterion::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCriterion::into_node).collect()
  }

  async fn update_criterion(&self, node: CriterionNode) -> Result<bool> {
    let r = CriterionParams::new(&node)?;

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE criteria SET
             parent_id = ?2, children = ?3, title = ?4, description = ?5,
             section = ?6, maturity = ?7
           WHERE criterion_id = ?1",
          rusqlite::params![
            r.criterion_id,
            r.parent_id,
            r.children,
            r.title,
            r.description,
            r.section,
            r.maturity,
          ],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn delete_criteria(&self, criterion_ids: Vec<Uuid>) -> Result<()> {
    let ids: Vec<String> = criterion_ids.into_iter().map(encode_uuid).collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for id in ids {
          tx.execute(
            "DELETE FROM criteria WHERE criterion_id = ?1",
            rusqlite::params![id],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Selection ─────────────────────────────────────────────────────────────

  async fn set_selection(&self, audit_id: Uuid, selection: Vec<Selection>) -> Result<()> {
    let audit_str = encode_uuid(audit_id);
    let rows: Vec<(String, Option<String>)> = selection
      .iter()
      .map(|s| {
        (
          encode_uuid(s.criterion_id),
          s.expected_level.map(|l| l.as_ref().to_owned()),
        )
      })
      .collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM selections WHERE audit_id = ?1",
          rusqlite::params![audit_str],
        )?;
        for (criterion, level) in rows {
          tx.execute(
            "INSERT INTO selections (audit_id, criterion_id, expected_level)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![audit_str, criterion, level],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_selection(&self, audit_id: Uuid) -> Result<Vec<Selection>> {
    let audit_str = encode_uuid(audit_id);

    let raws: Vec<RawSelection> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT criterion_id, expected_level FROM selections
           WHERE audit_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![audit_str], |row| {
            Ok(RawSelection {
              criterion_id:   row.get(0)?,
              expected_level: row.get(1)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSelection::into_selection).collect()
  }

  // ── Evidence ──────────────────────────────────────────────────────────────

  async fn add_evidence(&self, input: NewEvidence) -> Result<EvidenceItem> {
    if !self
      .exists("SELECT 1 FROM audits WHERE audit_id = ?1", input.audit_id)
      .await?
    {
      return Err(Error::AuditNotFound(input.audit_id));
    }

    let item = EvidenceItem {
      evidence_id:  Uuid::new_v4(),
      audit_id:     input.audit_id,
      artifact:     input.artifact,
      filename:     input.filename,
      content_hash: input.content_hash,
      size_bytes:   input.size_bytes,
      media_kind:   input.media_kind,
      status:       ExtractionStatus::Pending,
      content:      None,
      failure:      None,
      uploaded_by:  input.uploaded_by,
      uploaded_at:  Utc::now(),
      processed_at: None,
    };

    let id_str = encode_uuid(item.evidence_id);
    let audit_str = encode_uuid(item.audit_id);
    let artifact = item.artifact.as_str().to_owned();
    let filename = item.filename.clone();
    let hash = item.content_hash.clone();
    let size = item.size_bytes as i64;
    let kind_str = item.media_kind.as_ref().to_owned();
    let status_str = item.status.as_ref().to_owned();
    let by = item.uploaded_by.as_str().to_owned();
    let at_str = encode_dt(item.uploaded_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO evidence (
             evidence_id, audit_id, artifact, filename, content_hash,
             size_bytes, media_kind, status, uploaded_by, uploaded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          rusqlite::params![
            id_str, audit_str, artifact, filename, hash, size, kind_str,
            status_str, by, at_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(item)
  }

  async fn get_evidence(&self, evidence_id: Uuid) -> Result<Option<EvidenceItem>> {
    let id_str = encode_uuid(evidence_id);

    let raw: Option<RawEvidence> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM evidence WHERE evidence_id = ?1",
          RawEvidence::COLUMNS
        );
        Ok(
          conn
            .query_row(&sql, rusqlite::params![id_str], RawEvidence::from_row)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawEvidence::into_evidence).transpose()
  }

  async fn list_evidence(&self, audit_id: Uuid) -> Result<Vec<EvidenceItem>> {
    let audit_str = encode_uuid(audit_id);

    let raws: Vec<RawEvidence> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM evidence WHERE audit_id = ?1 ORDER BY uploaded_at, rowid",
          RawEvidence::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![audit_str], RawEvidence::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEvidence::into_evidence).collect()
  }

  async fn update_evidence(&self, item: EvidenceItem) -> Result<bool> {
    let id_str = encode_uuid(item.evidence_id);
    let status_str = item.status.as_ref().to_owned();
    let content = item.content.as_ref().map(encode_json).transpose()?;
    let failure = item.failure.as_ref().map(encode_json).transpose()?;
    let processed = item.processed_at.map(encode_dt);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE evidence SET
             status = ?2, content = ?3, failure = ?4, processed_at = ?5
           WHERE evidence_id = ?1",
          rusqlite::params![id_str, status_str, content, failure, processed],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn find_evidence_by_hash(
    &self,
    content_hash: String,
    audit_id: Option<Uuid>,
  ) -> Result<Vec<EvidenceItem>> {
    let audit_str = audit_id.map(encode_uuid);

    let raws: Vec<RawEvidence> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM evidence
           WHERE content_hash = ?1 AND (?2 IS NULL OR audit_id = ?2)
           ORDER BY uploaded_at, rowid",
          RawEvidence::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![content_hash, audit_str], RawEvidence::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEvidence::into_evidence).collect()
  }

  async fn delete_evidence(&self, evidence_id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(evidence_id);
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM evidence WHERE evidence_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;
    Ok(removed > 0)
  }

  // ── Links ─────────────────────────────────────────────────────────────────

  async fn add_link(&self, input: NewLink) -> Result<EvidenceLink> {
    let link = new_link(input, Utc::now());
    let params = LinkParams::new(&link);
    self
      .conn
      .call(move |conn| Ok(params.insert(conn)?))
      .await?;
    Ok(link)
  }

  async fn add_links(&self, inputs: Vec<NewLink>) -> Result<Vec<EvidenceLink>> {
    let now = Utc::now();
    let links: Vec<EvidenceLink> = inputs.into_iter().map(|l| new_link(l, now)).collect();
    let rows: Vec<LinkParams> = links.iter().map(LinkParams::new).collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for r in &rows {
          r.insert(&tx)?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(links)
  }

  async fn get_link(&self, link_id: Uuid) -> Result<Option<EvidenceLink>> {
    let id_str = encode_uuid(link_id);

    let raw: Option<RawLink> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {} FROM links WHERE link_id = ?1", RawLink::COLUMNS);
        Ok(
          conn
            .query_row(&sql, rusqlite::params![id_str], RawLink::from_row)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawLink::into_link).transpose()
  }

  async fn list_links(&self, query: LinkQuery) -> Result<Vec<EvidenceLink>> {
    let audit_str = query.audit_id.map(encode_uuid);
    let evidence_str = query.evidence_id.map(encode_uuid);
    let criterion_str = query.criterion_id.map(encode_uuid);
    let status_str = query.status.map(|s| s.as_ref().to_owned());

    let raws: Vec<RawLink> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM links
           WHERE (?1 IS NULL OR audit_id = ?1)
             AND (?2 IS NULL OR evidence_id = ?2)
             AND (?3 IS NULL OR criterion_id = ?3)
             AND (?4 IS NULL OR status = ?4)
           ORDER BY created_at, rowid",
          RawLink::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![audit_str, evidence_str, criterion_str, status_str],
            RawLink::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawLink::into_link).collect()
  }

  async fn update_link(&self, link: EvidenceLink) -> Result<bool> {
    let id_str = encode_uuid(link.link_id);
    let weight = f64::from(link.weight);
    let hint = link.level_hint.map(|l| l.as_ref().to_owned());
    let origin = link.origin.as_ref().to_owned();
    let status = link.status.as_ref().to_owned();
    let confirmed_by = link.confirmed_by.as_ref().map(|a| a.as_str().to_owned());
    let confirmed_at = link.confirmed_at.map(encode_dt);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE links SET
             weight = ?2, level_hint = ?3, origin = ?4, status = ?5,
             confirmed_by = ?6, confirmed_at = ?7
           WHERE link_id = ?1",
          rusqlite::params![
            id_str,
            weight,
            hint,
            origin,
            status,
            confirmed_by,
            confirmed_at,
          ],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn delete_link(&self, link_id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(link_id);
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM links WHERE link_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;
    Ok(removed > 0)
  }

  // ── Assessments ───────────────────────────────────────────────────────────

  async fn get_assessment(
    &self,
    audit_id: Uuid,
    criterion_id: Uuid,
  ) -> Result<Option<MaturityAssessment>> {
    let audit_str = encode_uuid(audit_id);
    let criterion_str = encode_uuid(criterion_id);

    let raw: Option<RawAssessment> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM assessments WHERE audit_id = ?1 AND criterion_id = ?2",
          RawAssessment::COLUMNS
        );
        Ok(
          conn
            .query_row(
              &sql,
              rusqlite::params![audit_str, criterion_str],
              RawAssessment::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAssessment::into_assessment).transpose()
  }

  async fn list_assessments(&self, audit_id: Uuid) -> Result<Vec<MaturityAssessment>> {
    let audit_str = encode_uuid(audit_id);

    let raws: Vec<RawAssessment> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM assessments WHERE audit_id = ?1 ORDER BY rowid",
          RawAssessment::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![audit_str], RawAssessment::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAssessment::into_assessment).collect()
  }

  async fn put_assessments(&self, assessments: Vec<MaturityAssessment>) -> Result<()> {
    let rows = assessments
      .iter()
      .map(AssessmentParams::new)
      .collect::<Result<Vec<_>>>()?;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for r in &rows {
          r.upsert(&tx)?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Questions ─────────────────────────────────────────────────────────────

  async fn add_questions(&self, inputs: Vec<NewQuestion>) -> Result<Vec<Question>> {
    let now = Utc::now();
    let questions: Vec<Question> = inputs
      .into_iter()
      .map(|q| Question {
        question_id:  Uuid::new_v4(),
        audit_id:     q.audit_id,
        criterion_id: q.criterion_id,
        text:         q.text,
        created_by:   q.created_by,
        created_at:   now,
        answers:      0,
      })
      .collect();
    let rows: Vec<[String; 6]> = questions
      .iter()
      .map(|q| {
        [
          encode_uuid(q.question_id),
          encode_uuid(q.audit_id),
          encode_uuid(q.criterion_id),
          q.text.clone(),
          q.created_by.as_str().to_owned(),
          encode_dt(q.created_at),
        ]
      })
      .collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for r in &rows {
          tx.execute(
            "INSERT INTO questions (
               question_id, audit_id, criterion_id, text, created_by, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params_from_iter(r.iter()),
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(questions)
  }

  async fn get_question(&self, question_id: Uuid) -> Result<Option<Question>> {
    let id_str = encode_uuid(question_id);

    let raw: Option<RawQuestion> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM questions q WHERE q.question_id = ?1",
          RawQuestion::COLUMNS
        );
        Ok(
          conn
            .query_row(&sql, rusqlite::params![id_str], RawQuestion::from_row)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawQuestion::into_question).transpose()
  }

  async fn list_questions(&self, query: QuestionQuery) -> Result<Vec<Question>> {
    let audit_str = encode_uuid(query.audit_id);
    let criterion_str = query.criterion_id.map(encode_uuid);
    let unanswered_only = query.unanswered_only;

    let raws: Vec<RawQuestion> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM questions q
           WHERE q.audit_id = ?1
             AND (?2 IS NULL OR q.criterion_id = ?2)
             AND (?3 = 0 OR NOT EXISTS (
               SELECT 1 FROM answers a WHERE a.question_id = q.question_id
             ))
           ORDER BY q.created_at, q.rowid",
          RawQuestion::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![audit_str, criterion_str, unanswered_only],
            RawQuestion::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawQuestion::into_question).collect()
  }

  async fn add_answer(&self, input: NewAnswer) -> Result<Answer> {
    let answer = Answer {
      answer_id:   Uuid::new_v4(),
      question_id: input.question_id,
      text:        input.text,
      answered_by: input.answered_by,
      answered_at: Utc::now(),
    };
    let id_str = encode_uuid(answer.answer_id);
    let question_str = encode_uuid(answer.question_id);
    let text = answer.text.clone();
    let by = answer.answered_by.as_str().to_owned();
    let at_str = encode_dt(answer.answered_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO answers (answer_id, question_id, text, answered_by, answered_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![id_str, question_str, text, by, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(answer)
  }

  async fn list_answers(&self, question_id: Uuid) -> Result<Vec<Answer>> {
    let question_str = encode_uuid(question_id);

    let raws: Vec<RawAnswer> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM answers WHERE question_id = ?1 ORDER BY answered_at, rowid",
          RawAnswer::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![question_str], RawAnswer::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAnswer::into_answer).collect()
  }
}
