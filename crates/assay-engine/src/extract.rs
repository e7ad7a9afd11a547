//! Media-kind detection and normalisation of provider output.
//!
//! Everything here is synchronous and side-effect free; the classifier does
//! the I/O and calls in.

use assay_core::{
  analysis::{RawExtraction, TimedText},
  evidence::{ExtractedContent, MediaKind, Segment},
};
use infer::MatcherType;

// ─── Detection ───────────────────────────────────────────────────────────────

/// Guess a media kind from magic numbers, falling back to UTF-8 text.
pub fn sniff(bytes: &[u8]) -> Option<MediaKind> {
  if let Some(found) = infer::get(bytes) {
    let kind = match found.matcher_type() {
      MatcherType::Image => Some(MediaKind::Image),
      MatcherType::Audio => Some(MediaKind::Audio),
      MatcherType::Video => Some(MediaKind::Video),
      MatcherType::Doc | MatcherType::Book => Some(MediaKind::Document),
      MatcherType::Text => Some(MediaKind::Text),
      _ if found.mime_type() == "application/pdf" => Some(MediaKind::Document),
      _ => None,
    };
    if kind.is_some() {
      return kind;
    }
  }
  (!bytes.is_empty() && std::str::from_utf8(bytes).is_ok()).then_some(MediaKind::Text)
}

/// Why an upload's kind could not be settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindProblem {
  /// Nothing declared and the signature is unrecognised.
  Unrecognised,
  /// The declared kind disagrees with the content signature.
  Mismatch {
    declared: MediaKind,
    detected: Option<MediaKind>,
  },
}

impl KindProblem {
  pub fn describe(self) -> String {
    match self {
      Self::Unrecognised => "content signature not recognised".to_owned(),
      Self::Mismatch {
        declared,
        detected: Some(detected),
      } => format!("declared {declared} but content looks like {detected}"),
      Self::Mismatch {
        declared,
        detected: None,
      } => format!("declared {declared} but content signature is not recognised"),
    }
  }
}

/// Settle the media kind of an upload.
///
/// Images, audio and video must carry a matching signature. Documents are
/// accepted unless the bytes are clearly some other medium. Text must be
/// valid UTF-8.
pub fn resolve_kind(
  declared: Option<MediaKind>,
  bytes: &[u8],
) -> Result<MediaKind, KindProblem> {
  let detected = sniff(bytes);
  let Some(declared) = declared else {
    return detected.ok_or(KindProblem::Unrecognised);
  };
  let ok = match declared {
    MediaKind::Image | MediaKind::Audio | MediaKind::Video => detected == Some(declared),
    MediaKind::Document => matches!(
      detected,
      None | Some(MediaKind::Document) | Some(MediaKind::Text)
    ),
    MediaKind::Text => std::str::from_utf8(bytes).is_ok(),
  };
  if ok {
    Ok(declared)
  } else {
    Err(KindProblem::Mismatch { declared, detected })
  }
}

// ─── Normalisation ───────────────────────────────────────────────────────────

/// Page marker placed before each page's text.
pub fn page_marker(number: u32) -> String { format!("--- page {number} ---") }

fn timestamp(ms: u64) -> String {
  let secs = ms / 1000;
  format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Turn provider output into the stored content shape.
pub fn normalise(raw: RawExtraction) -> ExtractedContent {
  match raw {
    RawExtraction::Pages(pages) => {
      let mut text = String::new();
      let mut segments = Vec::with_capacity(pages.len());
      for (i, page) in pages.into_iter().enumerate() {
        let number = i as u32 + 1;
        if !text.is_empty() {
          text.push('\n');
        }
        text.push_str(&page_marker(number));
        text.push('\n');
        text.push_str(page.trim_end());
        segments.push(Segment::Page { number, text: page });
      }
      ExtractedContent { text, segments }
    }
    RawExtraction::Text(text) | RawExtraction::Caption(text) => ExtractedContent {
      text,
      segments: Vec::new(),
    },
    RawExtraction::Transcript { text, utterances } => ExtractedContent {
      text,
      segments: utterances.into_iter().map(utterance).collect(),
    },
    RawExtraction::Keyframes(frames) => fuse_video(frames, Vec::new()),
  }
}

fn utterance(t: TimedText) -> Segment {
  Segment::Utterance {
    start_ms: t.start_ms,
    end_ms:   t.end_ms,
    text:     t.text,
  }
}

/// Merge keyframe descriptions and transcript utterances into one
/// chronological account. At equal timestamps the frame comes first.
pub fn fuse_video(keyframes: Vec<TimedText>, utterances: Vec<TimedText>) -> ExtractedContent {
  let mut segments: Vec<Segment> = keyframes
    .into_iter()
    .map(|k| Segment::Keyframe {
      at_ms: k.start_ms,
      text:  k.text,
    })
    .chain(utterances.into_iter().map(utterance))
    .collect();
  // Stable, so frames stay ahead of speech at the same instant.
  segments.sort_by_key(|s| match s {
    Segment::Keyframe { at_ms, .. } => *at_ms,
    Segment::Utterance { start_ms, .. } => *start_ms,
    Segment::Page { .. } => 0,
  });

  let text = segments
    .iter()
    .filter_map(|s| match s {
      Segment::Keyframe { at_ms, text } => Some(format!("[{}] frame: {text}", timestamp(*at_ms))),
      Segment::Utterance { start_ms, text, .. } => {
        Some(format!("[{}] speech: {text}", timestamp(*start_ms)))
      }
      Segment::Page { .. } => None,
    })
    .collect::<Vec<_>>()
    .join("\n");

  ExtractedContent { text, segments }
}

/// Transcript text without timestamps, kept as a single utterance so it still
/// lands in the fused account.
pub fn untimed_transcript(text: String) -> Vec<TimedText> {
  if text.trim().is_empty() {
    return Vec::new();
  }
  vec![TimedText {
    start_ms: 0,
    end_ms: None,
    text,
  }]
}
