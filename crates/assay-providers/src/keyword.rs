//! Offline analysis by word overlap.

use std::collections::HashSet;

use assay_core::{
  analysis::{AnalysisError, AnalysisService, RawExtraction},
  blob::{ArtifactHandle, BlobStore},
  evidence::MediaKind,
};

use crate::pages;

/// Words this short carry no signal.
const MIN_WORD_LEN: usize = 3;
/// A maturity description this well covered by the evidence needs no
/// question.
const COVERED: f32 = 0.5;

/// Reads text and documents that decode as UTF-8; every other kind is
/// unsupported. Scores are the share of the reference's distinct words that
/// appear in the text. Questions ask about the maturity descriptions the
/// evidence leaves uncovered.
#[derive(Debug, Clone)]
pub struct KeywordAnalysis<B> {
  blobs: B,
}

impl<B> KeywordAnalysis<B> {
  pub fn new(blobs: B) -> Self { Self { blobs } }
}

fn words(text: &str) -> HashSet<String> {
  text
    .split(|c: char| !c.is_alphanumeric())
    .filter(|w| w.chars().count() >= MIN_WORD_LEN)
    .map(str::to_lowercase)
    .collect()
}

pub(crate) fn overlap(text: &str, reference: &str) -> f32 {
  let wanted = words(reference);
  if wanted.is_empty() {
    return 0.0;
  }
  let have = words(text);
  wanted.intersection(&have).count() as f32 / wanted.len() as f32
}

impl<B: BlobStore> AnalysisService for KeywordAnalysis<B> {
  async fn extract_text(
    &self,
    handle: &ArtifactHandle,
    kind: MediaKind,
  ) -> Result<RawExtraction, AnalysisError> {
    if !matches!(kind, MediaKind::Document | MediaKind::Text) {
      return Err(AnalysisError::UnsupportedFormat(format!(
        "keyword analysis cannot read {kind}"
      )));
    }
    let bytes = self
      .blobs
      .retrieve(handle)
      .await
      .map_err(|e| AnalysisError::Unavailable(e.to_string()))?;
    let text = std::str::from_utf8(&bytes)
      .map_err(|_| AnalysisError::UnsupportedFormat("document has no text layer".into()))?;
    Ok(match kind {
      MediaKind::Document => RawExtraction::Pages(pages(text)),
      _ => RawExtraction::Text(text.to_owned()),
    })
  }

  async fn semantic_score(&self, text: &str, reference: &str) -> Result<f32, AnalysisError> {
    Ok(overlap(text, reference))
  }

  async fn generate_questions(
    &self,
    criterion: &str,
    evidence: &str,
  ) -> Result<Vec<String>, AnalysisError> {
    let mut lines = criterion.lines();
    let title = lines.next().unwrap_or_default().trim();
    if evidence.trim().is_empty() {
      return Ok(vec![
        format!("What documents or artefacts show how you handle {title}?"),
        format!("Who is responsible for {title}, and how is it reviewed?"),
      ]);
    }
    Ok(
      lines
        .filter_map(|line| line.split_once(": "))
        .filter(|(_, description)| overlap(evidence, description) < COVERED)
        .map(|(level, description)| {
          format!("For {title}, is there evidence of the {level} practice: {description}?")
        })
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use bytes::Bytes;

  use super::*;
  use crate::FsBlobStore;

  #[test]
  fn overlap_ignores_case_and_short_words() {
    assert_eq!(overlap("Deploys ARE automated", "automated deploys"), 1.0);
    assert_eq!(overlap("a b c", "an it of"), 0.0);
    assert!((overlap("automated builds", "automated repeatable builds") - 2.0 / 3.0).abs() < 1e-6);
  }

  #[tokio::test]
  async fn questions_target_uncovered_levels() {
    let dir = tempfile::tempdir().unwrap();
    let analysis = KeywordAnalysis::new(FsBlobStore::open(dir.path()).await.unwrap());
    let criterion = "Continuous integration\nBuilds run on every merge\n\
                     novice: manual sporadic builds\n\
                     intermediate: automated repeatable builds\n\
                     advanced: continuous optimised pipelines";

    let open = analysis.generate_questions(criterion, "").await.unwrap();
    assert_eq!(open.len(), 2);
    assert!(open[0].contains("Continuous integration"));

    let asked = analysis
      .generate_questions(criterion, "Builds are automated and repeatable")
      .await
      .unwrap();
    assert_eq!(asked, vec![
      "For Continuous integration, is there evidence of the novice practice: manual sporadic \
       builds?",
      "For Continuous integration, is there evidence of the advanced practice: continuous \
       optimised pipelines?",
    ]);
  }

  #[tokio::test]
  async fn documents_split_on_form_feeds_and_images_are_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let blobs = FsBlobStore::open(dir.path()).await.unwrap();
    let handle = blobs
      .store(Bytes::from_static(b"one\x0ctwo"))
      .await
      .unwrap();
    let analysis = KeywordAnalysis::new(blobs);

    assert_eq!(
      analysis.extract_text(&handle, MediaKind::Document).await.unwrap(),
      RawExtraction::Pages(vec!["one".into(), "two".into()])
    );
    assert!(matches!(
      analysis.extract_text(&handle, MediaKind::Image).await,
      Err(AnalysisError::UnsupportedFormat(_))
    ));
  }
}
