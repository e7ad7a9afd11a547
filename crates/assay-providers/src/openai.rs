//! OpenAI-compatible analysis over HTTP.
//!
//! | Kind     | Endpoint                                   |
//! |----------|--------------------------------------------|
//! | image    | `chat/completions` with an inline data URL |
//! | document | UTF-8 decoded locally, else `chat/completions` with an inline file |
//! | audio    | `audio/transcriptions` (`verbose_json`)    |
//! | video    | no keyframes; the audio track goes to `audio/transcriptions` |
//! | scoring  | `embeddings`, cosine similarity            |
//! | questions | `chat/completions`, one question per line |

use std::time::Duration;

use assay_core::{
  analysis::{AnalysisError, AnalysisService, RawExtraction, TimedText},
  blob::{ArtifactHandle, BlobStore},
  evidence::MediaKind,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use reqwest::{Client, StatusCode, multipart};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{
  error::{Error, Result},
  pages,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Upload ceiling of the transcription endpoint.
const TRANSCRIPTION_LIMIT: u64 = 25 * 1024 * 1024;
/// Characters of evidence sent for embedding.
const EMBED_CHAR_LIMIT: usize = 24_000;

const AUDITOR_PROMPT: &str = "You are an expert technical and product auditor. You reply in \
                              British English. Describe factual content only; do not assess \
                              maturity.";
const IMAGE_PROMPT: &str = "Describe this image for a technical and product audit. If it is \
                            irrelevant (a logo or unrelated picture) reply with the single word \
                            'irrelevant'. Otherwise describe the content in detail, especially \
                            system screenshots, architecture diagrams, process charts and \
                            documentation.";
const DOCUMENT_PROMPT: &str = "Transcribe the text of this document verbatim. Separate pages \
                               with a form feed character and add nothing else.";
const QUESTIONS_PROMPT: &str = "Write up to five follow-up questions for the organisation under \
                                audit about the criterion below. Ask about gaps the evidence \
                                leaves open; with no evidence, ask what evidence exists. Reply \
                                with one question per line and nothing else.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
  pub base_url:             String,
  pub api_key:              String,
  pub vision_model:         String,
  pub transcription_model:  String,
  pub embedding_model:      String,
  pub request_timeout_secs: u64,
}

impl Default for OpenAiConfig {
  fn default() -> Self {
    Self {
      base_url:             DEFAULT_BASE_URL.into(),
      api_key:              String::new(),
      vision_model:         "gpt-4o".into(),
      transcription_model:  "whisper-1".into(),
      embedding_model:      "text-embedding-3-small".into(),
      request_timeout_secs: 120,
    }
  }
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatMessage {
  content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
  message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
  choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct TranscriptSegment {
  start: f64,
  end:   f64,
  text:  String,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
  text:     String,
  #[serde(default)]
  segments: Vec<TranscriptSegment>,
}

#[derive(Debug, Deserialize)]
struct Embedding {
  embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
  data: Vec<Embedding>,
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// Cheap to clone when `B` is; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct OpenAiAnalysis<B> {
  client: Client,
  config: OpenAiConfig,
  blobs:  B,
}

fn seconds_to_ms(s: f64) -> u64 { (s.max(0.0) * 1000.0).round() as u64 }

fn truncate(text: &str, max_chars: usize) -> &str {
  match text.char_indices().nth(max_chars) {
    Some((i, _)) => &text[..i],
    None => text,
  }
}

/// Cosine similarity mapped onto `[0, 1]`; opposite vectors score 0.
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
  let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
  let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
  let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
  if na == 0.0 || nb == 0.0 {
    return 0.0;
  }
  (dot / (na * nb)).clamp(0.0, 1.0)
}

fn transport(e: reqwest::Error) -> AnalysisError {
  if e.is_timeout() {
    AnalysisError::Timeout
  } else {
    AnalysisError::Unavailable(e.to_string())
  }
}

impl<B: BlobStore> OpenAiAnalysis<B> {
  pub fn new(config: OpenAiConfig, blobs: B) -> Result<Self> {
    if config.api_key.trim().is_empty() {
      return Err(Error::Config("openai analysis needs an api_key".into()));
    }
    let client = Client::builder()
      .timeout(Duration::from_secs(config.request_timeout_secs))
      .build()?;
    Ok(Self {
      client,
      config,
      blobs,
    })
  }

  fn url(&self, path: &str) -> String {
    format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
  }

  async fn bytes(&self, handle: &ArtifactHandle) -> Result<Bytes, AnalysisError> {
    self
      .blobs
      .retrieve(handle)
      .await
      .map_err(|e| AnalysisError::Unavailable(format!("artifact {handle}: {e}")))
  }

  /// Send a request and decode a JSON body, classifying failures.
  async fn call<T: DeserializeOwned>(
    &self,
    request: reqwest::RequestBuilder,
  ) -> Result<T, AnalysisError> {
    let response = request
      .bearer_auth(&self.config.api_key)
      .send()
      .await
      .map_err(transport)?;
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      let body = truncate(&body, 320).to_owned();
      warn!(%status, %body, "analysis request rejected");
      return Err(match status {
        StatusCode::BAD_REQUEST
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY => AnalysisError::UnsupportedFormat(body),
        _ => AnalysisError::Unavailable(format!("{status}: {body}")),
      });
    }
    response.json().await.map_err(transport)
  }

  async fn chat(&self, content: Value) -> Result<String, AnalysisError> {
    let payload = json!({
      "model": self.config.vision_model,
      "messages": [
        { "role": "system", "content": AUDITOR_PROMPT },
        { "role": "user", "content": content },
      ],
    });
    let response: ChatResponse = self
      .call(self.client.post(self.url("chat/completions")).json(&payload))
      .await?;
    response
      .choices
      .into_iter()
      .next()
      .and_then(|c| c.message.content)
      .map(|c| c.trim().to_owned())
      .ok_or_else(|| AnalysisError::Unavailable("empty chat completion".into()))
  }

  async fn caption(&self, bytes: &[u8]) -> Result<RawExtraction, AnalysisError> {
    let mime = infer::get(bytes).map_or("image/jpeg", |t| t.mime_type());
    let url = format!("data:{mime};base64,{}", STANDARD.encode(bytes));
    let caption = self
      .chat(json!([
        { "type": "text", "text": IMAGE_PROMPT },
        { "type": "image_url", "image_url": { "url": url } },
      ]))
      .await?;
    Ok(RawExtraction::Caption(caption))
  }

  async fn document(&self, bytes: &[u8]) -> Result<RawExtraction, AnalysisError> {
    if let Ok(text) = std::str::from_utf8(bytes) {
      return Ok(RawExtraction::Pages(pages(text)));
    }
    let mime = infer::get(bytes).map_or("application/pdf", |t| t.mime_type());
    let data = format!("data:{mime};base64,{}", STANDARD.encode(bytes));
    let text = self
      .chat(json!([
        { "type": "text", "text": DOCUMENT_PROMPT },
        { "type": "file", "file": { "filename": "evidence", "file_data": data } },
      ]))
      .await?;
    Ok(RawExtraction::Pages(pages(&text)))
  }

  async fn transcribe(
    &self,
    bytes: Bytes,
    kind: MediaKind,
  ) -> Result<RawExtraction, AnalysisError> {
    let size = bytes.len() as u64;
    if size > TRANSCRIPTION_LIMIT {
      return Err(AnalysisError::ContentTooLarge {
        size,
        limit: TRANSCRIPTION_LIMIT,
      });
    }
    let (filename, mime) = match infer::get(&bytes) {
      Some(t) => (format!("{kind}.{}", t.extension()), t.mime_type().to_owned()),
      None => (format!("{kind}.bin"), "application/octet-stream".to_owned()),
    };
    let part = multipart::Part::bytes(bytes.to_vec())
      .file_name(filename)
      .mime_str(&mime)
      .map_err(|e| AnalysisError::UnsupportedFormat(e.to_string()))?;
    let form = multipart::Form::new()
      .text("model", self.config.transcription_model.clone())
      .text("response_format", "verbose_json")
      .part("file", part);

    let response: TranscriptResponse = self
      .call(self.client.post(self.url("audio/transcriptions")).multipart(form))
      .await?;
    debug!(segments = response.segments.len(), "transcript received");
    Ok(RawExtraction::Transcript {
      text:       response.text,
      utterances: response
        .segments
        .into_iter()
        .map(|s| TimedText {
          start_ms: seconds_to_ms(s.start),
          end_ms:   Some(seconds_to_ms(s.end)),
          text:     s.text.trim().to_owned(),
        })
        .collect(),
    })
  }
}

impl<B: BlobStore> AnalysisService for OpenAiAnalysis<B> {
  async fn extract_text(
    &self,
    handle: &ArtifactHandle,
    kind: MediaKind,
  ) -> Result<RawExtraction, AnalysisError> {
    if kind == MediaKind::Video {
      return Err(AnalysisError::UnsupportedFormat(
        "keyframe sampling is not available; use the audio track".into(),
      ));
    }
    let bytes = self.bytes(handle).await?;
    match kind {
      MediaKind::Image => self.caption(&bytes).await,
      MediaKind::Document => self.document(&bytes).await,
      MediaKind::Text => String::from_utf8(bytes.to_vec())
        .map(RawExtraction::Text)
        .map_err(|e| AnalysisError::UnsupportedFormat(e.to_string())),
      MediaKind::Audio | MediaKind::Video => self.transcribe(bytes, kind).await,
    }
  }

  async fn semantic_score(&self, text: &str, reference: &str) -> Result<f32, AnalysisError> {
    let payload = json!({
      "model": self.config.embedding_model,
      "input": [truncate(text, EMBED_CHAR_LIMIT), truncate(reference, EMBED_CHAR_LIMIT)],
    });
    let response: EmbeddingResponse = self
      .call(self.client.post(self.url("embeddings")).json(&payload))
      .await?;
    match response.data.as_slice() {
      [a, b] => Ok(cosine(&a.embedding, &b.embedding)),
      other => Err(AnalysisError::Unavailable(format!(
        "expected 2 embeddings, got {}",
        other.len()
      ))),
    }
  }

  async fn generate_questions(
    &self,
    criterion: &str,
    evidence: &str,
  ) -> Result<Vec<String>, AnalysisError> {
    let evidence = match evidence.trim() {
      "" => "(none yet)",
      text => truncate(text, EMBED_CHAR_LIMIT),
    };
    let prompt = format!("{QUESTIONS_PROMPT}\n\nCriterion:\n{criterion}\n\nEvidence:\n{evidence}");
    let reply = self.chat(Value::String(prompt)).await?;
    Ok(question_lines(&reply))
  }
}

/// Split a chat reply into questions, dropping list markers and blank lines.
fn question_lines(reply: &str) -> Vec<String> {
  reply
    .lines()
    .map(|line| {
      line
        .trim()
        .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '-' | '*' | '.' | ')'))
        .trim()
    })
    .filter(|line| !line.is_empty())
    .map(str::to_owned)
    .collect()
}
