//! Hand-written collaborators and a seeded engine for the unit tests.

use std::{
  collections::{HashMap, HashSet},
  sync::{
    Arc, Mutex as StdMutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
  time::Duration,
};

use assay_core::{
  Actor,
  analysis::{AnalysisError, AnalysisService, RawExtraction, TimedText},
  assessment::MaturityAssessment,
  audit::{Audit, AuditState, Company, NewAudit, NewCompany, Selection},
  blob::{ArtifactHandle, BlobStore},
  criterion::{CriterionNode, MaturityDefinitions},
  evidence::{EvidenceItem, MediaKind, NewEvidence},
  link::{EvidenceLink, NewLink},
  question::{Answer, NewAnswer, NewQuestion, Question},
  store::{AuditStore, CriteriaScope, LinkQuery, QuestionQuery},
};
use assay_store_sqlite::SqliteStore;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
  Engine, EngineConfig,
  classifier::{Upload, UploadOutcome, content_hash},
};

/// Evidence text that the scripted analysis scores well against the CI
/// criterion and poorly against the others.
pub const CI_NOTES: &str =
  "Continuous integration: builds are automated and repeatable on every merge";

// ─── Blobs ───────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MemoryBlobs {
  inner: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemoryBlobs {
  pub async fn len(&self) -> usize { self.inner.lock().await.len() }

  async fn get(&self, handle: &ArtifactHandle) -> std::io::Result<Bytes> {
    self
      .inner
      .lock()
      .await
      .get(handle.as_str())
      .cloned()
      .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, handle.to_string()))
  }
}

impl BlobStore for MemoryBlobs {
  type Error = std::io::Error;

  async fn store(&self, bytes: Bytes) -> std::io::Result<ArtifactHandle> {
    let key = content_hash(&bytes);
    self.inner.lock().await.insert(key.clone(), bytes);
    Ok(ArtifactHandle::new(key))
  }

  async fn retrieve(&self, handle: &ArtifactHandle) -> std::io::Result<Bytes> {
    self.get(handle).await
  }

  async fn delete(&self, handle: &ArtifactHandle) -> std::io::Result<()> {
    self.inner.lock().await.remove(handle.as_str());
    Ok(())
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FlakyError {
  #[error(transparent)]
  Sqlite(#[from] assay_store_sqlite::Error),
  #[error("injected store fault")]
  Injected,
}

/// The SQLite store with a switch that breaks cross-audit hash lookups.
#[derive(Clone)]
pub struct FlakyStore {
  inner:             SqliteStore,
  fail_hash_lookups: Arc<AtomicBool>,
}

impl FlakyStore {
  pub fn set_fail_hash_lookups(&self, fail: bool) {
    self.fail_hash_lookups.store(fail, Ordering::SeqCst);
  }
}

impl AuditStore for FlakyStore {
  type Error = FlakyError;

  async fn add_company(&self, c: NewCompany) -> Result<Company, FlakyError> {
    Ok(self.inner.add_company(c).await?)
  }

  async fn get_company(&self, id: Uuid) -> Result<Option<Company>, FlakyError> {
    Ok(self.inner.get_company(id).await?)
  }

  async fn list_companies(&self) -> Result<Vec<Company>, FlakyError> {
    Ok(self.inner.list_companies().await?)
  }

  async fn delete_company(&self, id: Uuid) -> Result<bool, FlakyError> {
    Ok(self.inner.delete_company(id).await?)
  }

  async fn add_audit(&self, a: NewAudit) -> Result<Audit, FlakyError> {
    Ok(self.inner.add_audit(a).await?)
  }

  async fn get_audit(&self, id: Uuid) -> Result<Option<Audit>, FlakyError> {
    Ok(self.inner.get_audit(id).await?)
  }

  async fn list_audits(&self, company_id: Option<Uuid>) -> Result<Vec<Audit>, FlakyError> {
    Ok(self.inner.list_audits(company_id).await?)
  }

  async fn update_audit(&self, a: Audit) -> Result<Option<Audit>, FlakyError> {
    Ok(self.inner.update_audit(a).await?)
  }

  async fn update_audit_with_assessments(
    &self,
    a: Audit,
    assessments: Vec<MaturityAssessment>,
  ) -> Result<Option<Audit>, FlakyError> {
    Ok(self.inner.update_audit_with_assessments(a, assessments).await?)
  }

  async fn delete_audit(&self, id: Uuid) -> Result<bool, FlakyError> {
    Ok(self.inner.delete_audit(id).await?)
  }

  async fn insert_criteria(&self, nodes: Vec<CriterionNode>) -> Result<(), FlakyError> {
    Ok(self.inner.insert_criteria(nodes).await?)
  }

  async fn get_criterion(&self, id: Uuid) -> Result<Option<CriterionNode>, FlakyError> {
    Ok(self.inner.get_criterion(id).await?)
  }

  async fn list_criteria(&self, scope: CriteriaScope) -> Result<Vec<CriterionNode>, FlakyError> {
    Ok(self.inner.list_criteria(scope).await?)
  }

  async fn update_criterion(&self, node: CriterionNode) -> Result<bool, FlakyError> {
    Ok(self.inner.update_criterion(node).await?)
  }

  async fn delete_criteria(&self, ids: Vec<Uuid>) -> Result<(), FlakyError> {
    Ok(self.inner.delete_criteria(ids).await?)
  }

  async fn set_selection(&self, id: Uuid, selection: Vec<Selection>) -> Result<(), FlakyError> {
    Ok(self.inner.set_selection(id, selection).await?)
  }

  async fn get_selection(&self, id: Uuid) -> Result<Vec<Selection>, FlakyError> {
    Ok(self.inner.get_selection(id).await?)
  }

  async fn add_evidence(&self, e: NewEvidence) -> Result<EvidenceItem, FlakyError> {
    Ok(self.inner.add_evidence(e).await?)
  }

  async fn get_evidence(&self, id: Uuid) -> Result<Option<EvidenceItem>, FlakyError> {
    Ok(self.inner.get_evidence(id).await?)
  }

  async fn list_evidence(&self, audit_id: Uuid) -> Result<Vec<EvidenceItem>, FlakyError> {
    Ok(self.inner.list_evidence(audit_id).await?)
  }

  async fn update_evidence(&self, e: EvidenceItem) -> Result<bool, FlakyError> {
    Ok(self.inner.update_evidence(e).await?)
  }

  async fn find_evidence_by_hash(
    &self,
    hash: String,
    audit_id: Option<Uuid>,
  ) -> Result<Vec<EvidenceItem>, FlakyError> {
    if audit_id.is_none() && self.fail_hash_lookups.load(Ordering::SeqCst) {
      return Err(FlakyError::Injected);
    }
    Ok(self.inner.find_evidence_by_hash(hash, audit_id).await?)
  }

  async fn delete_evidence(&self, id: Uuid) -> Result<bool, FlakyError> {
    Ok(self.inner.delete_evidence(id).await?)
  }

  async fn add_link(&self, l: NewLink) -> Result<EvidenceLink, FlakyError> {
    Ok(self.inner.add_link(l).await?)
  }

  async fn add_links(&self, l: Vec<NewLink>) -> Result<Vec<EvidenceLink>, FlakyError> {
    Ok(self.inner.add_links(l).await?)
  }

  async fn get_link(&self, id: Uuid) -> Result<Option<EvidenceLink>, FlakyError> {
    Ok(self.inner.get_link(id).await?)
  }

  async fn list_links(&self, q: LinkQuery) -> Result<Vec<EvidenceLink>, FlakyError> {
    Ok(self.inner.list_links(q).await?)
  }

  async fn update_link(&self, l: EvidenceLink) -> Result<bool, FlakyError> {
    Ok(self.inner.update_link(l).await?)
  }

  async fn delete_link(&self, id: Uuid) -> Result<bool, FlakyError> {
    Ok(self.inner.delete_link(id).await?)
  }

  async fn get_assessment(
    &self,
    audit_id: Uuid,
    criterion_id: Uuid,
  ) -> Result<Option<MaturityAssessment>, FlakyError> {
    Ok(self.inner.get_assessment(audit_id, criterion_id).await?)
  }

  async fn list_assessments(&self, audit_id: Uuid) -> Result<Vec<MaturityAssessment>, FlakyError> {
    Ok(self.inner.list_assessments(audit_id).await?)
  }

  async fn put_assessments(&self, a: Vec<MaturityAssessment>) -> Result<(), FlakyError> {
    Ok(self.inner.put_assessments(a).await?)
  }

  async fn add_questions(&self, q: Vec<NewQuestion>) -> Result<Vec<Question>, FlakyError> {
    Ok(self.inner.add_questions(q).await?)
  }

  async fn get_question(&self, id: Uuid) -> Result<Option<Question>, FlakyError> {
    Ok(self.inner.get_question(id).await?)
  }

  async fn list_questions(&self, q: QuestionQuery) -> Result<Vec<Question>, FlakyError> {
    Ok(self.inner.list_questions(q).await?)
  }

  async fn add_answer(&self, a: NewAnswer) -> Result<Answer, FlakyError> {
    Ok(self.inner.add_answer(a).await?)
  }

  async fn list_answers(&self, question_id: Uuid) -> Result<Vec<Answer>, FlakyError> {
    Ok(self.inner.list_answers(question_id).await?)
  }
}

// ─── Analysis ────────────────────────────────────────────────────────────────

/// Deterministic stand-in for the AI capability.
///
/// - images caption as `caption of <n> bytes`
/// - documents split their UTF-8 bytes into pages on form feeds
/// - videos have no keyframes, only a two-line audio transcript
/// - semantic score is the share of the reference's words found in the text
/// - questions name the criterion title; with no evidence they ask for some,
///   with evidence they ask about depth and repeat one question in another case
#[derive(Clone)]
pub struct ScriptedAnalysis {
  blobs:       MemoryBlobs,
  calls:       Arc<AtomicUsize>,
  unavailable: Arc<AtomicBool>,
  delay:       Arc<StdMutex<Option<Duration>>>,
}

impl ScriptedAnalysis {
  pub fn new(blobs: MemoryBlobs) -> Self {
    Self {
      blobs,
      calls: Arc::default(),
      unavailable: Arc::default(),
      delay: Arc::default(),
    }
  }

  /// Number of `extract_text` calls so far.
  pub fn extract_calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }

  pub fn set_delay(&self, delay: Option<Duration>) {
    *self.delay.lock().unwrap() = delay;
  }

  pub fn set_unavailable(&self, down: bool) { self.unavailable.store(down, Ordering::SeqCst); }

  async fn pause(&self) -> Result<(), AnalysisError> {
    let delay = *self.delay.lock().unwrap();
    if let Some(d) = delay {
      tokio::time::sleep(d).await;
    }
    if self.unavailable.load(Ordering::SeqCst) {
      return Err(AnalysisError::Unavailable("scripted outage".into()));
    }
    Ok(())
  }
}

fn words(text: &str) -> HashSet<String> {
  text
    .split(|c: char| !c.is_alphanumeric())
    .filter(|w| !w.is_empty())
    .map(str::to_lowercase)
    .collect()
}

/// Share of `reference`'s distinct words that also occur in `text`.
pub fn overlap(text: &str, reference: &str) -> f32 {
  let wanted = words(reference);
  if wanted.is_empty() {
    return 0.0;
  }
  let have = words(text);
  wanted.intersection(&have).count() as f32 / wanted.len() as f32
}

impl AnalysisService for ScriptedAnalysis {
  async fn extract_text(
    &self,
    handle: &ArtifactHandle,
    kind: MediaKind,
  ) -> Result<RawExtraction, AnalysisError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.pause().await?;
    let bytes = self
      .blobs
      .get(handle)
      .await
      .map_err(|e| AnalysisError::Unavailable(e.to_string()))?;
    match kind {
      MediaKind::Image => Ok(RawExtraction::Caption(format!(
        "caption of {} bytes",
        bytes.len()
      ))),
      MediaKind::Document | MediaKind::Text => Ok(RawExtraction::Pages(
        String::from_utf8_lossy(&bytes)
          .split('\x0c')
          .map(str::to_owned)
          .collect(),
      )),
      MediaKind::Video => Err(AnalysisError::UnsupportedFormat("no keyframes".into())),
      MediaKind::Audio => Ok(RawExtraction::Transcript {
        text:       "we deploy daily. rollbacks are automated".into(),
        utterances: vec![
          TimedText {
            start_ms: 0,
            end_ms:   Some(2_000),
            text:     "we deploy daily".into(),
          },
          TimedText {
            start_ms: 2_000,
            end_ms:   Some(4_500),
            text:     "rollbacks are automated".into(),
          },
        ],
      }),
    }
  }

  async fn semantic_score(&self, text: &str, reference: &str) -> Result<f32, AnalysisError> {
    self.pause().await?;
    Ok(overlap(text, reference))
  }

  async fn generate_questions(
    &self,
    criterion: &str,
    evidence: &str,
  ) -> Result<Vec<String>, AnalysisError> {
    self.pause().await?;
    let title = criterion.lines().next().unwrap_or_default();
    if evidence.trim().is_empty() {
      return Ok(vec![
        format!("What evidence can you share about {title}?"),
        format!("Who owns {title}?"),
      ]);
    }
    Ok(vec![
      format!("How is {title} measured?"),
      format!("What would move {title} to the next level?"),
      format!("how is {title} measured?"),
    ])
  }
}

// ─── Harness ─────────────────────────────────────────────────────────────────

pub type TestEngine = Engine<FlakyStore, MemoryBlobs, ScriptedAnalysis>;

/// An engine over an in-memory store, seeded with one company and a small
/// base taxonomy:
///
/// ```text
/// Delivery (root)
/// ├── Continuous integration (ci)
/// ├── Automated testing (testing)
/// └── Documentation (docs)
/// ```
///
/// Audits from [`Harness::audit_in`] select `ci` and `testing`, so `docs` is
/// out of scope.
pub struct Harness {
  pub engine:     TestEngine,
  pub store:      FlakyStore,
  pub analysis:   ScriptedAnalysis,
  pub blobs:      MemoryBlobs,
  pub actor:      Actor,
  pub company_id: Uuid,
  pub root:       Uuid,
  pub ci:         Uuid,
  pub testing:    Uuid,
  pub docs:       Uuid,
}

fn definitions() -> MaturityDefinitions {
  MaturityDefinitions {
    novice:       "manual sporadic".into(),
    intermediate: "automated repeatable".into(),
    advanced:     "continuous optimised".into(),
  }
}

impl Harness {
  pub async fn new() -> Self { Self::with_config(EngineConfig::default()).await }

  pub async fn with_config(config: EngineConfig) -> Self {
    let store = FlakyStore {
      inner:             SqliteStore::open_in_memory().await.unwrap(),
      fail_hash_lookups: Arc::default(),
    };
    let blobs = MemoryBlobs::default();
    let analysis = ScriptedAnalysis::new(blobs.clone());
    let engine = Engine::new(store.clone(), blobs.clone(), analysis.clone(), config).unwrap();
    let actor = Actor::new("auditor@example.com");

    let company = engine
      .create_company(
        NewCompany {
          name:        "Acme".into(),
          description: None,
          sector:      Some("Logistics".into()),
        },
        &actor,
      )
      .await
      .unwrap();

    let mut h = Self {
      engine,
      store,
      analysis,
      blobs,
      actor,
      company_id: company.company_id,
      root: Uuid::nil(),
      ci: Uuid::nil(),
      testing: Uuid::nil(),
      docs: Uuid::nil(),
    };

    let root = h.node(None, "Delivery");
    h.root = root.criterion_id;
    let mut ci = h.node(Some(h.root), "Continuous integration");
    ci.description = "Builds run on every merge".into();
    let mut testing = h.node(Some(h.root), "Automated testing");
    testing.description = "Tests gate every change".into();
    let docs = h.node(Some(h.root), "Documentation");
    h.ci = ci.criterion_id;
    h.testing = testing.criterion_id;
    h.docs = docs.criterion_id;
    h.engine
      .store()
      .insert_criteria(vec![root, ci, testing, docs])
      .await
      .unwrap();
    h
  }

  /// A base-taxonomy node with complete maturity text. Not stored.
  pub fn node(&self, parent_id: Option<Uuid>, title: &str) -> CriterionNode {
    CriterionNode {
      criterion_id: Uuid::new_v4(),
      parent_id,
      children: Vec::new(),
      title: title.into(),
      description: String::new(),
      section: Some("Engineering".into()),
      maturity: definitions(),
      audit_id: None,
      created_at: Utc::now(),
    }
  }

  pub async fn new_audit(&self) -> Audit {
    self
      .engine
      .create_audit(
        NewAudit {
          company_id:  self.company_id,
          name:        "2026 review".into(),
          description: None,
          settings:    None,
        },
        &self.actor,
      )
      .await
      .unwrap()
  }

  /// A fresh audit walked forward to `state`.
  pub async fn audit_in(&self, state: AuditState) -> Audit {
    let mut audit = self.new_audit().await;
    let id = audit.audit_id;
    let steps = [
      AuditState::CriteriaSelected,
      AuditState::EvidenceCollection,
      AuditState::Scoring,
    ];
    for step in steps {
      if audit.state == state {
        break;
      }
      audit = match step {
        AuditState::CriteriaSelected => self
          .engine
          .select_criteria(
            id,
            vec![
              Selection {
                criterion_id:   self.ci,
                expected_level: None,
              },
              Selection {
                criterion_id:   self.testing,
                expected_level: None,
              },
            ],
            &self.actor,
          )
          .await
          .unwrap(),
        AuditState::EvidenceCollection => {
          self.engine.start_evidence_collection(id, &self.actor).await.unwrap()
        }
        _ => self.engine.start_scoring(id, &self.actor).await.unwrap(),
      };
    }
    assert_eq!(audit.state, state, "harness cannot reach {state}");
    audit
  }

  pub fn text_upload(&self, filename: &str, text: &str) -> Upload {
    Upload {
      filename:      Some(filename.into()),
      declared_kind: Some(MediaKind::Text),
      bytes:         Bytes::from(text.to_owned()),
    }
  }

  /// A PNG signature followed by filler; enough for sniffing.
  pub fn image_upload(&self, filename: &str) -> Upload {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(b"\0\0\0\rIHDR\0\0\0\x10");
    Upload {
      filename:      Some(filename.into()),
      declared_kind: Some(MediaKind::Image),
      bytes:         Bytes::from(bytes),
    }
  }

  /// Like [`Self::image_upload`], but the bytes differ per filename.
  pub fn distinct_image_upload(&self, filename: &str) -> Upload {
    let mut upload = self.image_upload(filename);
    let mut bytes = upload.bytes.to_vec();
    bytes.extend_from_slice(filename.as_bytes());
    upload.bytes = Bytes::from(bytes);
    upload
  }

  /// Bytes that claim to be an image but carry no known signature.
  pub fn corrupt_image_upload(&self) -> Upload {
    Upload {
      filename:      Some("broken.png".into()),
      declared_kind: Some(MediaKind::Image),
      bytes:         Bytes::from_static(&[0x00, 0x13, 0x37, 0xFF, 0x00]),
    }
  }

  /// An MP4 `ftyp` box header followed by filler.
  pub fn video_upload(&self, filename: &str) -> Upload {
    let mut bytes = vec![0x00, 0x00, 0x00, 0x18];
    bytes.extend_from_slice(b"ftypisom\0\0\x02\0isomiso2");
    bytes.extend_from_slice(&[0u8; 16]);
    Upload {
      filename:      Some(filename.into()),
      declared_kind: Some(MediaKind::Video),
      bytes:         Bytes::from(bytes),
    }
  }

  /// Upload one text file and return the extracted item.
  pub async fn upload_text(&self, audit_id: Uuid, filename: &str, text: &str) -> EvidenceItem {
    let mut outcomes = self
      .engine
      .upload_batch(audit_id, vec![self.text_upload(filename, text)], &self.actor)
      .await
      .unwrap();
    match outcomes.remove(0) {
      UploadOutcome::Stored(item) => item,
      UploadOutcome::Rejected { error, .. } => panic!("text upload rejected: {error}"),
    }
  }
}
