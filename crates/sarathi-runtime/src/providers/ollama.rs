//! Ollama provider.
//!
//! Ollama's `/api/generate` accepts a JSON Schema in `format`, so schema
//! requests are constrained natively. Small local models make this the
//! usual resource-constrained secondary.

use super::{
    factory::ProviderFactory, secrets::ApiCredential, GenerationRequest, GenerationResponse,
    LlmProvider, OutputMode, ProviderError,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

/// Optional bearer token for hosted Ollama endpoints.
pub const OLLAMA_API_KEY_ENV: &str = "OLLAMA_API_KEY";

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.2";

/// Ollama backend.
pub struct OllamaProvider {
    base_url: String,
    model: String,
    credential: Option<ApiCredential>,
    client: reqwest::Client,
}

impl std::fmt::Debug for OllamaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("credential", &self.credential)
            .finish()
    }
}

impl OllamaProvider {
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let base_url = config
            .get("base_url")
            .and_then(JsonValue::as_str)
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let model = config
            .get("model")
            .and_then(JsonValue::as_str)
            .unwrap_or(DEFAULT_MODEL)
            .to_string();
        let credential = ApiCredential::optional_from_config_or_env(
            config,
            "api_key",
            OLLAMA_API_KEY_ENV,
            "Ollama API key",
        );
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ProviderError::HttpError(e.to_string()))?;

        Ok(Self {
            base_url,
            model,
            credential,
            client,
        })
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a JsonValue>,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    model: String,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, ProviderError> {
        let format = match &request.output_mode {
            OutputMode::Schema(schema) => Some(schema),
            OutputMode::FreeText => None,
        };
        let body = OllamaRequest {
            model: &self.model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            stream: false,
            format,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let mut call = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(request.timeout)
            .json(&body);
        if let Some(credential) = &self.credential {
            call = call.bearer_auth(credential.expose());
        }

        let response = call.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(request.timeout)
            } else {
                ProviderError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ProviderError::AuthError);
        }
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited { retry_after: None });
        }
        if !status.is_success() {
            let message = match response.json::<OllamaError>().await {
                Ok(body) => body.error,
                Err(e) => format!("unreadable error body: {e}"),
            };
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        Ok(GenerationResponse {
            text: body.response,
            input_tokens: body.prompt_eval_count,
            output_tokens: body.eval_count,
            provider: self.name().to_string(),
            model: body.model,
        })
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_schema_mode(&self) -> bool {
        true
    }
}

/// Factory for creating Ollama providers from configuration.
///
/// ## Configuration Format
/// ```json
/// {
///   "base_url": "http://localhost:11434",  // Optional
///   "model": "llama3.2",                   // Optional
///   "api_key": "..."                       // Optional, falls back to OLLAMA_API_KEY env
/// }
/// ```
pub struct OllamaProviderFactory;

impl ProviderFactory for OllamaProviderFactory {
    fn provider_type(&self) -> &'static str {
        "ollama"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(OllamaProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if let Some(url) = config.get("base_url").and_then(JsonValue::as_str) {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "base_url": DEFAULT_BASE_URL, "model": DEFAULT_MODEL })
    }

    fn description(&self) -> &'static str {
        "Local Ollama server with native schema-constrained output"
    }
}
