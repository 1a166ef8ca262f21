//! AI vision extractor — sends image bytes to a vision model with a fixed
//! prompt/schema contract and normalizes the reply into a draft.
//!
//! The raw HTTP call lives behind the `VisionClient` trait so retry
//! classification can be tested without a network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};

use crate::error::ExtractionError;
use crate::extract::fields::{RawFields, TransactionDraft};
use crate::extract::Extractor;

/// Total attempts per extract call under transient failure.
const MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff.
const BASE_DELAY: Duration = Duration::from_millis(500);

/// The fixed prompt. The model must answer with strict JSON matching
/// `RawFields`; anything else is a schema mismatch.
const EXTRACTION_PROMPT: &str = "\
Analyze this image (invoice or payment screenshot).
Extract the following details in strict JSON format only (no Markdown, no code blocks):
{
    \"merchant\": \"string or null\",
    \"amount\": number or null,
    \"currency\": \"string (ISO 4217 code) or null\",
    \"date\": \"YYYY-MM-DD or null\",
    \"category\": \"string (guess based on merchant name) or null\"
}

Rules:
- Return ONLY valid JSON, no other text
- If a field cannot be determined, use null
- Amount: the non-negative transaction total as a number
- Date should be in YYYY-MM-DD format
- Category should be a single word or short phrase (e.g. \"Food\", \"Transport\", \"Coffee\")
- Currency should be an ISO code (INR, USD, etc.)";

/// The raw vision capability: prompt + image in, model text out.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, ExtractionError>;
}

/// Gemini `generateContent` client.
pub struct GeminiClient {
    api_key: SecretString,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: SecretString, model: String) -> Self {
        Self {
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        )
    }
}

#[async_trait]
impl VisionClient for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, ExtractionError> {
        let body = serde_json::json!({
            "contents": [{
                "parts": [
                    {"text": prompt},
                    {"inline_data": {
                        "mime_type": mime_type,
                        "data": base64::engine::general_purpose::STANDARD.encode(image),
                    }}
                ]
            }]
        });

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let payload: serde_json::Value =
            resp.json().await.map_err(|e| ExtractionError::Transient {
                reason: format!("response body unreadable: {e}"),
            })?;

        response_text(&payload).ok_or_else(|| ExtractionError::SchemaMismatch {
            reason: format!("no candidate text in response: {payload}"),
        })
    }
}

/// Pull the first candidate's text out of a `generateContent` response.
fn response_text(payload: &serde_json::Value) -> Option<String> {
    payload
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
        .map(String::from)
}

fn classify_request_error(e: &reqwest::Error) -> ExtractionError {
    if e.is_timeout() || e.is_connect() {
        ExtractionError::Transient {
            reason: e.to_string(),
        }
    } else {
        ExtractionError::Permanent {
            reason: e.to_string(),
        }
    }
}

/// HTTP status → error kind. Rate limiting and server trouble are
/// retry-eligible; everything else won't improve on retry.
fn classify_status(status: reqwest::StatusCode, body: &str) -> ExtractionError {
    if status.as_u16() == 429 || status.as_u16() == 408 || status.is_server_error() {
        ExtractionError::Transient {
            reason: format!("vision API returned {status}: {body}"),
        }
    } else {
        ExtractionError::Permanent {
            reason: format!("vision API returned {status}: {body}"),
        }
    }
}

/// Vision-backed extraction strategy with bounded retry.
pub struct AiVisionExtractor {
    client: Arc<dyn VisionClient>,
    max_attempts: u32,
    base_delay: Duration,
}

impl AiVisionExtractor {
    pub fn new(client: Arc<dyn VisionClient>) -> Self {
        Self {
            client,
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_DELAY,
        }
    }

    /// Override the retry schedule (tests use a zero delay).
    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay = base_delay;
        self
    }
}

#[async_trait]
impl Extractor for AiVisionExtractor {
    fn name(&self) -> &str {
        "gemini-vision"
    }

    async fn extract(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<TransactionDraft, ExtractionError> {
        let mut attempt = 1;
        let text = loop {
            match self
                .client
                .generate(EXTRACTION_PROMPT, image, mime_type)
                .await
            {
                Ok(text) => break text,
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = backoff_delay(self.base_delay, attempt);
                    tracing::warn!(
                        attempt,
                        max = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient extraction failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        parse_payload(&text)
    }
}

/// Exponential backoff with jitter: base * 2^(attempt-1), plus up to 20%.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << (attempt - 1).min(10));
    let jitter = rand::thread_rng().gen_range(0.0..0.2);
    exp.mul_f64(1.0 + jitter)
}

/// Parse the model's reply into a draft. Markdown code fences are
/// tolerated; anything that isn't the agreed JSON shape is a mismatch.
fn parse_payload(text: &str) -> Result<TransactionDraft, ExtractionError> {
    let stripped = strip_code_fences(text);

    let raw: serde_json::Value =
        serde_json::from_str(stripped).map_err(|e| ExtractionError::SchemaMismatch {
            reason: format!("invalid JSON ({e}): {}", truncate(stripped, 200)),
        })?;

    let fields: RawFields =
        serde_json::from_value(raw.clone()).map_err(|e| ExtractionError::SchemaMismatch {
            reason: format!("unexpected payload shape ({e}): {}", truncate(stripped, 200)),
        })?;

    Ok(fields.into_draft(raw))
}

/// Strip a surrounding Markdown code fence, if present.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
