//! Generation backend abstractions.
//!
//! Every stage talks to a backend through [`LlmProvider`]. A request carries
//! a static label naming the stage that issued it, which is used for
//! tracing and by the replay provider.
//!
//! ## Security
//!
//! Providers that need credentials hold them as [`ApiCredential`], which
//! never appears in `Debug` or `Display` output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;

mod factory;
mod replay;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

#[cfg(feature = "ollama")]
mod ollama;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use replay::{ReplayProvider, ReplayProviderFactory};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};

#[cfg(feature = "ollama")]
pub use ollama::{OllamaProvider, OllamaProviderFactory};

/// Errors from generation backends.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Classification used when a provider does not override it.
    ///
    /// Timeouts, connection failures, rate limits, server-side 5xx, and
    /// garbled response bodies are worth retrying. Everything else is not.
    pub fn default_class(&self) -> ErrorClass {
        match self {
            ProviderError::HttpError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::ParseError(_)
            | ProviderError::Timeout(_) => ErrorClass::Transient,
            ProviderError::ApiError { status, .. } if *status >= 500 => ErrorClass::Transient,
            ProviderError::ApiError { .. }
            | ProviderError::AuthError
            | ProviderError::NotConfigured(_) => ErrorClass::Permanent,
        }
    }
}

/// Whether an error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Permanent,
}

impl ErrorClass {
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// How the backend should shape its output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputMode {
    FreeText,
    /// Constrain output to this JSON Schema
    Schema(JsonValue),
}

/// A normalized generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Issuing stage ("draft", "structure", ...)
    pub label: &'static str,

    pub prompt: String,

    pub system: Option<String>,

    pub temperature: f32,

    pub max_tokens: u32,

    pub timeout: Duration,

    pub output_mode: OutputMode,
}

impl GenerationRequest {
    pub fn new(label: &'static str, prompt: impl Into<String>) -> Self {
        Self {
            label,
            prompt: prompt.into(),
            system: None,
            temperature: 0.0,
            max_tokens: 1024,
            timeout: Duration::from_secs(60),
            output_mode: OutputMode::FreeText,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_schema(mut self, schema: JsonValue) -> Self {
        self.output_mode = OutputMode::Schema(schema);
        self
    }

    /// Prompt with the schema spelled out, for backends without native
    /// schema mode.
    pub fn prompt_with_schema_instructions(&self) -> String {
        match &self.output_mode {
            OutputMode::FreeText => self.prompt.clone(),
            OutputMode::Schema(schema) => format!(
                "{}\n\nRespond with a single JSON object, and nothing else, that conforms to this \
                 JSON Schema:\n{}",
                self.prompt,
                serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string())
            ),
        }
    }
}

/// A normalized generation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Backend identifier, e.g. "anthropic"
    pub provider: String,
    pub model: String,
}

impl GenerationResponse {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Provider abstraction allows swapping generation backends.
///
/// This is the ONLY place where backend calls are made. Everything in
/// `sarathi-core` stays deterministic.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute one generation call.
    async fn generate(&self, request: &GenerationRequest)
        -> Result<GenerationResponse, ProviderError>;

    /// Check if provider is healthy.
    async fn health_check(&self) -> bool;

    /// Get provider name for logs and audit rows.
    fn name(&self) -> &str;

    /// Model identifier requests are sent to.
    fn model(&self) -> &str;

    /// Whether the backend can constrain output to a schema natively.
    fn supports_schema_mode(&self) -> bool {
        false
    }

    /// Whether an error this provider raised is worth retrying.
    fn classify_error(&self, error: &ProviderError) -> ErrorClass {
        error.default_class()
    }

    /// Estimate tokens for a prompt.
    fn estimate_tokens(&self, text: &str) -> u32 {
        // Simple estimate: ~4 chars per token
        (text.len() / 4) as u32
    }
}

impl std::fmt::Debug for dyn LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmProvider")
            .field("name", &self.name())
            .field("model", &self.model())
            .finish()
    }
}
