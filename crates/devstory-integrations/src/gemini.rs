//! Gemini REST implementation of `CompletionService`.
//!
//! One `generateContent` call per completion; the tier selects the model.

use std::time::Duration;

use async_trait::async_trait;
use devstory_core::{CompletionError, CompletionService, ModelTier};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IntegrationError, Result};

pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Gemini API configuration
#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub api_url: String,
    /// Model used for `ModelTier::Fast`
    pub fast_model: String,
    /// Model used for `ModelTier::Quality`
    pub quality_model: String,
    /// Transport timeout; the pipeline applies its own per-call limit too
    pub timeout_secs: u64,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("fast_model", &self.fast_model)
            .field("quality_model", &self.quality_model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl GeminiConfig {
    pub fn new(api_key: &str) -> Self {
        GeminiConfig {
            api_key: api_key.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            fast_model: DEFAULT_MODEL.to_string(),
            quality_model: DEFAULT_MODEL.to_string(),
            timeout_secs: 180,
        }
    }

    /// `GEMINI_API_KEY` (or `GOOGLE_API_KEY`) is required; models and URL
    /// fall back to defaults.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(IntegrationError::MissingConfig("GEMINI_API_KEY"))?;

        let mut config = Self::new(api_key.trim());
        if let Ok(url) = std::env::var("GEMINI_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("DEVSTORY_FAST_MODEL") {
            config.fast_model = model;
        }
        if let Ok(model) = std::env::var("DEVSTORY_QUALITY_MODEL") {
            config.quality_model = model;
        }
        Ok(config)
    }

    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast_model,
            ModelTier::Quality => &self.quality_model,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Gemini-backed completion service
pub struct GeminiCompletion {
    config: GeminiConfig,
    http: reqwest::Client,
}

impl GeminiCompletion {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("devstory/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(GeminiCompletion { config, http })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(GeminiConfig::from_env()?)
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{model}:generateContent", self.config.api_url)
    }
}

#[async_trait]
impl CompletionService for GeminiCompletion {
    async fn complete(&self, prompt: &str, tier: ModelTier) -> std::result::Result<String, CompletionError> {
        let model = self.config.model_for(tier);
        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
        };
        debug!(model = %model, tier = %tier, prompt_chars = prompt.len(), "gemini request");

        let response = self
            .http
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&e, self.config.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::ModelError(format!("malformed response: {e}")))?;
        extract_text(parsed)
    }
}

fn transport_error(err: &reqwest::Error, timeout_secs: u64) -> CompletionError {
    if err.is_timeout() || err.is_connect() {
        CompletionError::Timeout {
            after_ms: timeout_secs * 1000,
        }
    } else {
        CompletionError::ModelError(err.to_string())
    }
}

/// 429 and 503 (model overloaded) are rate limits; 408 and 504 are timeouts.
fn classify_status(status: StatusCode, detail: &str) -> CompletionError {
    let detail: String = detail.chars().take(300).collect();
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            CompletionError::RateLimited(format!("{status}: {detail}"))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => CompletionError::Timeout { after_ms: 0 },
        s => CompletionError::ModelError(format!("{s}: {detail}")),
    }
}

/// Concatenated text of the first candidate.
fn extract_text(response: GenerateResponse) -> std::result::Result<String, CompletionError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(CompletionError::ModelError(format!("prompt blocked: {reason}")));
    }
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(CompletionError::ModelError("no candidates returned".into()));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
        return Err(CompletionError::ModelError(format!(
            "empty completion (finish reason: {reason})"
        )));
    }
    Ok(text)
}
