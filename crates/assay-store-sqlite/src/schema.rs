//! SQL schema for the Assay SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// Ownership runs through foreign keys with `ON DELETE CASCADE`: deleting a
/// company removes its audits, and deleting an audit removes everything
/// scoped to it.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS companies (
    company_id  TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    description TEXT,
    sector      TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audits (
    audit_id      TEXT PRIMARY KEY,
    company_id    TEXT NOT NULL REFERENCES companies(company_id) ON DELETE CASCADE,
    name          TEXT NOT NULL,
    description   TEXT,
    state         TEXT NOT NULL,   -- snake_case AuditState
    settings      TEXT NOT NULL,   -- JSON AuditSettings
    version       INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    finalized_at  TEXT
);

-- Base taxonomy nodes have a NULL audit_id; custom nodes belong to one audit.
CREATE TABLE IF NOT EXISTS criteria (
    criterion_id TEXT PRIMARY KEY,
    parent_id    TEXT,
    children     TEXT NOT NULL DEFAULT '[]',   -- JSON array of ids
    title        TEXT NOT NULL,
    description  TEXT NOT NULL DEFAULT '',
    section      TEXT,
    maturity     TEXT NOT NULL,                -- JSON MaturityDefinitions
    audit_id     TEXT REFERENCES audits(audit_id) ON DELETE CASCADE,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS selections (
    audit_id       TEXT NOT NULL REFERENCES audits(audit_id) ON DELETE CASCADE,
    criterion_id   TEXT NOT NULL REFERENCES criteria(criterion_id) ON DELETE CASCADE,
    expected_level TEXT,
    PRIMARY KEY (audit_id, criterion_id)
);

CREATE TABLE IF NOT EXISTS evidence (
    evidence_id  TEXT PRIMARY KEY,
    audit_id     TEXT NOT NULL REFERENCES audits(audit_id) ON DELETE CASCADE,
    artifact     TEXT NOT NULL,
    filename     TEXT,
    content_hash TEXT NOT NULL,
    size_bytes   INTEGER NOT NULL,
    media_kind   TEXT NOT NULL,
    status       TEXT NOT NULL,
    content      TEXT,            -- JSON ExtractedContent
    failure      TEXT,            -- JSON ExtractionFailure
    uploaded_by  TEXT NOT NULL,
    uploaded_at  TEXT NOT NULL,
    processed_at TEXT
);

CREATE TABLE IF NOT EXISTS links (
    link_id      TEXT PRIMARY KEY,
    audit_id     TEXT NOT NULL REFERENCES audits(audit_id) ON DELETE CASCADE,
    evidence_id  TEXT NOT NULL REFERENCES evidence(evidence_id) ON DELETE CASCADE,
    criterion_id TEXT NOT NULL REFERENCES criteria(criterion_id) ON DELETE CASCADE,
    weight       REAL NOT NULL CHECK (weight >= 0.0 AND weight <= 1.0),
    level_hint   TEXT,
    origin       TEXT NOT NULL,
    status       TEXT NOT NULL,
    created_by   TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    confirmed_by TEXT,
    confirmed_at TEXT,
    UNIQUE (evidence_id, criterion_id)
);

CREATE TABLE IF NOT EXISTS assessments (
    audit_id           TEXT NOT NULL REFERENCES audits(audit_id) ON DELETE CASCADE,
    criterion_id       TEXT NOT NULL REFERENCES criteria(criterion_id) ON DELETE CASCADE,
    computed           TEXT NOT NULL,
    direct             TEXT NOT NULL,
    rolled_up          TEXT,
    human_override     TEXT,          -- JSON HumanOverride
    effective          TEXT NOT NULL,
    needs_review       INTEGER NOT NULL DEFAULT 0,
    rationale          TEXT NOT NULL DEFAULT '',
    breakdown          TEXT NOT NULL DEFAULT '[]',
    contributing_links TEXT NOT NULL DEFAULT '[]',
    locked             INTEGER NOT NULL DEFAULT 0,
    modified_by        TEXT NOT NULL,
    modified_at        TEXT NOT NULL,
    PRIMARY KEY (audit_id, criterion_id)
);

CREATE TABLE IF NOT EXISTS questions (
    question_id  TEXT PRIMARY KEY,
    audit_id     TEXT NOT NULL REFERENCES audits(audit_id) ON DELETE CASCADE,
    criterion_id TEXT NOT NULL REFERENCES criteria(criterion_id) ON DELETE CASCADE,
    text         TEXT NOT NULL,
    created_by   TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS answers (
    answer_id    TEXT PRIMARY KEY,
    question_id  TEXT NOT NULL REFERENCES questions(question_id) ON DELETE CASCADE,
    text         TEXT NOT NULL,
    answered_by  TEXT NOT NULL,
    answered_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS audits_company_idx   ON audits(company_id);
CREATE INDEX IF NOT EXISTS criteria_audit_idx   ON criteria(audit_id);
CREATE INDEX IF NOT EXISTS evidence_audit_idx   ON evidence(audit_id);
CREATE INDEX IF NOT EXISTS evidence_hash_idx    ON evidence(content_hash);
CREATE INDEX IF NOT EXISTS links_audit_idx      ON links(audit_id);
CREATE INDEX IF NOT EXISTS links_criterion_idx  ON links(criterion_id);
CREATE INDEX IF NOT EXISTS questions_audit_idx  ON questions(audit_id, criterion_id);
CREATE INDEX IF NOT EXISTS answers_question_idx ON answers(question_id);

PRAGMA user_version = 2;
";
