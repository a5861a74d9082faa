use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-pro";

/// Sampling parameters, fixed when the synthesizer is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub top_p: f32,
    /// `0` leaves top-k sampling disabled.
    pub top_k: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_output_tokens: 1_024,
            top_p: 0.95,
            top_k: 0,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, LlmError>;
}

/// Stands in when no API key is configured, so every answer takes the local
/// fallback.
#[derive(Debug, Clone)]
pub struct UnavailableLlm {
    pub reason: String,
}

#[async_trait]
impl LlmClient for UnavailableLlm {
    async fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<String, LlmError> {
        Err(LlmError::Unavailable(self.reason.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            api_key: api_key.into(),
            timeout_secs: 60,
        }
    }
}

pub struct GeminiClient {
    client: Client,
    url: Url,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, LlmError> {
        let url = Url::parse(&format!(
            "{}/models/{}:generateContent",
            config.endpoint.trim_end_matches('/'),
            config.model
        ))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        tracing::info!(model = %config.model, "configured gemini client");
        Ok(Self {
            client,
            url,
            api_key: config.api_key,
        })
    }
}

pub(crate) fn request_body(prompt: &str, config: &GenerationConfig) -> Value {
    let mut generation = json!({
        "temperature": config.temperature,
        "maxOutputTokens": config.max_output_tokens,
        "topP": config.top_p,
    });
    if config.top_k > 0 {
        generation["topK"] = json!(config.top_k);
    }

    json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": generation,
    })
}

pub(crate) fn parse_generation(parsed: &Value) -> Result<String, LlmError> {
    let text = parsed
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(text.to_string())
}

pub(crate) fn status_error(status: StatusCode, details: String) -> LlmError {
    if status == StatusCode::TOO_MANY_REQUESTS || details.contains("RESOURCE_EXHAUSTED") {
        return LlmError::RateLimited(details);
    }
    LlmError::Api {
        status: status.as_u16(),
        details,
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, LlmError> {
        let response = self
            .client
            .post(self.url.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(prompt, config))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(status_error(status, details));
        }

        parse_generation(&response.json().await?)
    }
}
