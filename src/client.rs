//! The description service boundary.
//!
//! [`Describer`] is the capability the rest of the crate depends on. The only
//! production implementation is [`GeminiClient`], which issues exactly one
//! `generateContent` call per request: no retries, no backoff, no timeout
//! beyond the HTTP client's defaults.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ApiKey, Config};
use crate::error::DescriptionError;
use crate::normalize::EncodedPayload;

/// Longest slice of an error body kept in [`DescriptionError`] details.
const MAX_DETAIL_CHARS: usize = 500;

/// One image paired with the instruction to apply to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionRequest {
    payload: EncodedPayload,
    instruction: String,
}

impl DescriptionRequest {
    pub fn new(payload: EncodedPayload, instruction: impl Into<String>) -> Self {
        Self {
            payload,
            instruction: instruction.into(),
        }
    }

    pub fn payload(&self) -> &EncodedPayload {
        &self.payload
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }
}

/// Non-empty description text with surrounding whitespace removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description(String);

impl Description {
    /// Trim `text`; `None` if nothing is left.
    pub fn from_text(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Anything that can turn a [`DescriptionRequest`] into text.
#[async_trait]
pub trait Describer: Send + Sync {
    async fn describe(&self, request: &DescriptionRequest) -> Result<Description, DescriptionError>;

    /// Model identifier reported back to the user.
    fn model(&self) -> &str;
}

/// Google Gemini `generateContent` client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: ApiKey,
    model: String,
    api_base: String,
}

impl GeminiClient {
    pub fn new(api_key: ApiKey, model: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model: model.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.api_key.clone(),
            config.model.clone(),
            config.api_base.clone(),
        )
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base, self.model
        )
    }
}

#[async_trait]
impl Describer for GeminiClient {
    async fn describe(&self, request: &DescriptionRequest) -> Result<Description, DescriptionError> {
        let payload = request.payload();
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: payload.media_type,
                            data: &payload.data,
                        },
                    },
                    Part::Text {
                        text: request.instruction(),
                    },
                ],
            }],
        };

        debug!(
            "Sending {}x{} image ({} bytes base64) to {}",
            payload.width,
            payload.height,
            payload.data.len(),
            self.model
        );

        // The key goes in a header so it never shows up in URLs or error text.
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!("Description request failed to send: {}", e);
                DescriptionError::Transport {
                    detail: e.without_url().to_string(),
                }
            })?;

        let status = response.status();
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response
            .text()
            .await
            .map_err(|e| DescriptionError::Transport {
                detail: e.without_url().to_string(),
            })?;

        if !status.is_success() {
            warn!("Description service returned {}", status);
            return Err(status_error(status, retry_after_secs, &text));
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| DescriptionError::MalformedResponse {
                detail: e.to_string(),
            })?;
        let description = extract_description(parsed)?;
        info!(
            "Description received from {} ({} chars)",
            self.model,
            description.as_str().chars().count()
        );
        Ok(description)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn status_error(status: StatusCode, retry_after_secs: Option<u64>, body: &str) -> DescriptionError {
    let detail = error_detail(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DescriptionError::Authentication {
            status: status.as_u16(),
            detail,
        },
        StatusCode::TOO_MANY_REQUESTS => DescriptionError::RateLimited { retry_after_secs },
        // Gemini reports a bad key as 400 INVALID_ARGUMENT.
        StatusCode::BAD_REQUEST if body.contains("API_KEY_INVALID") => {
            DescriptionError::Authentication {
                status: status.as_u16(),
                detail,
            }
        }
        _ => DescriptionError::Api {
            status: status.as_u16(),
            detail,
        },
    }
}

/// Prefer the service's own `error.message`, else a prefix of the raw body.
fn error_detail(body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        if let Some(message) = envelope.error.message.filter(|m| !m.is_empty()) {
            return message;
        }
    }
    body.chars().take(MAX_DETAIL_CHARS).collect()
}

fn extract_description(response: GenerateResponse) -> Result<Description, DescriptionError> {
    let candidate = response.candidates.into_iter().next();
    let Some(candidate) = candidate else {
        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(DescriptionError::Blocked { reason });
        }
        return Err(DescriptionError::EmptyResponse);
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    match Description::from_text(&text) {
        Some(description) => Ok(description),
        None => match candidate.finish_reason.as_deref() {
            Some(reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT")) => {
                Err(DescriptionError::Blocked {
                    reason: reason.to_string(),
                })
            }
            _ => Err(DescriptionError::EmptyResponse),
        },
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    InlineData { inline_data: InlineData<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}
