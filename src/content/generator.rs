//! External content generator seam and its OpenAI-compatible implementation.

use async_trait::async_trait;

use super::prompt::GenerationPrompt;
use crate::config::GeneratorConfig;

/// Stable error codes for generator failures.
pub mod error_codes {
    /// Invalid or missing configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// Authentication failed (invalid/missing API key).
    pub const AUTH_FAILED: &str = "AUTH_FAILED";

    /// Request to the provider failed.
    pub const REQUEST_FAILED: &str = "REQUEST_FAILED";

    /// Request timed out.
    pub const TIMEOUT_ERROR: &str = "TIMEOUT_ERROR";

    /// Provider-specific error not covered by other variants.
    pub const PROVIDER_ERROR: &str = "PROVIDER_ERROR";

    /// The provider answered but the envelope had no usable content.
    pub const INVALID_RESPONSE: &str = "INVALID_RESPONSE";
}

/// Errors from a content generator. Never escapes the broker.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    ConfigError(String),

    #[error("[{}] {}", error_codes::AUTH_FAILED, .0)]
    AuthError(String),

    #[error("[{}] {}", error_codes::REQUEST_FAILED, .0)]
    RequestError(String),

    #[error("[{}] {}", error_codes::TIMEOUT_ERROR, .0)]
    TimeoutError(String),

    #[error("[{}] {}", error_codes::PROVIDER_ERROR, .0)]
    ProviderError(String),

    #[error("[{}] {}", error_codes::INVALID_RESPONSE, .0)]
    InvalidResponse(String),
}

impl GeneratorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => error_codes::CONFIG_INVALID,
            Self::AuthError(_) => error_codes::AUTH_FAILED,
            Self::RequestError(_) => error_codes::REQUEST_FAILED,
            Self::TimeoutError(_) => error_codes::TIMEOUT_ERROR,
            Self::ProviderError(_) => error_codes::PROVIDER_ERROR,
            Self::InvalidResponse(_) => error_codes::INVALID_RESPONSE,
        }
    }

    /// Transient failures. The broker still does not retry these: its single
    /// retry is reserved for schema-invalid responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConfigError(_) | Self::AuthError(_) => false,
            Self::RequestError(_) | Self::TimeoutError(_) | Self::ProviderError(_) => true,
            Self::InvalidResponse(_) => false,
        }
    }
}

/// Produces raw text (expected to be a JSON object) from a prompt.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &GenerationPrompt) -> Result<String, GeneratorError>;
}

/// Connection settings for [`OpenAiGenerator`].
#[derive(Debug, Clone)]
pub struct OpenAiGeneratorConfig {
    pub api_key: String,
    /// Base URL (defaults to `https://api.openai.com`).
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl OpenAiGeneratorConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com".into(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: 800,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_sampling(mut self, temperature: f64, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Build from the `[generator]` section. `None` when disabled or when
    /// no API key is available.
    pub fn from_settings(settings: &GeneratorConfig) -> Option<Self> {
        if !settings.enabled {
            return None;
        }
        let api_key = settings.resolve_api_key()?;
        Some(
            Self::new(api_key, settings.effective_model())
                .with_base_url(settings.base_url.clone())
                .with_sampling(settings.temperature, settings.max_tokens),
        )
    }
}

/// Non-streaming Chat Completions client requesting a JSON object response.
pub struct OpenAiGenerator {
    config: OpenAiGeneratorConfig,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: OpenAiGeneratorConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn build_body(&self, prompt: &GenerationPrompt) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "response_format": {"type": "json_object"},
        })
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> GeneratorError {
        let message = extract_error_message(body);
        match status.as_u16() {
            401 | 403 => GeneratorError::AuthError(format!("authentication failed: {message}")),
            429 => GeneratorError::RequestError(format!("rate limited: {message}")),
            _ => GeneratorError::ProviderError(format!("HTTP {}: {message}", status.as_u16())),
        }
    }
}

/// Extract an error message from an OpenAI-style error body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &GenerationPrompt) -> Result<String, GeneratorError> {
        if self.config.api_key.trim().is_empty() {
            return Err(GeneratorError::ConfigError("API key is empty".to_owned()));
        }

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&self.build_body(prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeneratorError::TimeoutError(e.to_string())
                } else {
                    GeneratorError::RequestError(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &body_text));
        }

        let envelope: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GeneratorError::InvalidResponse(format!("unreadable body: {e}")))?;

        envelope
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GeneratorError::InvalidResponse("no message content".to_owned()))
    }
}
