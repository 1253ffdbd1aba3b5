//! Replay provider: answers from canned per-label responses.
//!
//! Makes offline runs and demos possible without network access.
//!
//! ## Configuration Format
//! ```json
//! {
//!   "model": "replay",
//!   "responses": {
//!     "acceptance": "accepted",
//!     "draft": "Long-form prose ...",
//!     "structure": [{ "error": "timeout" }, { "json": { "executive_summary": "..." } }]
//!   }
//! }
//! ```
//!
//! A list is consumed in order and its last entry repeats. An entry is a
//! string (returned as text), `{"json": ..}` (returned serialized), or
//! `{"error": kind}` with kind one of `timeout`, `http`, `rate_limited`,
//! `server`, `auth`, `bad_request`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use super::{
    factory::ProviderFactory, GenerationRequest, GenerationResponse, LlmProvider, ProviderError,
};

/// Offline backend that replays configured responses.
#[derive(Debug)]
pub struct ReplayProvider {
    model: String,
    responses: BTreeMap<String, Vec<JsonValue>>,
    cursors: Mutex<HashMap<String, usize>>,
}

impl ReplayProvider {
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        validate(config)?;
        let model = config
            .get("model")
            .and_then(JsonValue::as_str)
            .unwrap_or("replay")
            .to_string();

        let mut responses = BTreeMap::new();
        if let Some(map) = config.get("responses").and_then(JsonValue::as_object) {
            for (label, entry) in map {
                let entries = match entry {
                    JsonValue::Array(list) => list.clone(),
                    other => vec![other.clone()],
                };
                responses.insert(label.clone(), entries);
            }
        }

        Ok(Self {
            model,
            responses,
            cursors: Mutex::new(HashMap::new()),
        })
    }

    /// Next entry for a label; the last one repeats.
    fn next_entry(&self, label: &str) -> Option<JsonValue> {
        let entries = self.responses.get(label)?;
        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(label.to_string()).or_insert(0);
        let entry = entries.get(*cursor).or_else(|| entries.last())?.clone();
        *cursor += 1;
        Some(entry)
    }
}

fn validate(config: &JsonValue) -> Result<(), ProviderError> {
    match config.get("responses") {
        None | Some(JsonValue::Object(_)) => Ok(()),
        Some(_) => Err(ProviderError::NotConfigured(
            "replay 'responses' must be a map of label to response".to_string(),
        )),
    }
}

fn entry_to_result(entry: JsonValue, timeout: Duration) -> Result<String, ProviderError> {
    match entry {
        JsonValue::String(text) => Ok(text),
        JsonValue::Object(map) => {
            if let Some(kind) = map.get("error").and_then(JsonValue::as_str) {
                return Err(replayed_error(kind, timeout));
            }
            match map.get("json") {
                Some(value) => Ok(value.to_string()),
                None => Ok(JsonValue::Object(map).to_string()),
            }
        }
        other => Ok(other.to_string()),
    }
}

fn replayed_error(kind: &str, timeout: Duration) -> ProviderError {
    match kind {
        "timeout" => ProviderError::Timeout(timeout),
        "rate_limited" => ProviderError::RateLimited { retry_after: None },
        "server" => ProviderError::ApiError {
            status: 503,
            message: "replayed server error".to_string(),
        },
        "auth" => ProviderError::AuthError,
        "bad_request" => ProviderError::ApiError {
            status: 400,
            message: "replayed bad request".to_string(),
        },
        _ => ProviderError::HttpError(format!("replayed {kind} error")),
    }
}

#[async_trait]
impl LlmProvider for ReplayProvider {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, ProviderError> {
        let entry = self.next_entry(request.label).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "no replay response for label '{}'",
                request.label
            ))
        })?;
        let text = entry_to_result(entry, request.timeout)?;

        Ok(GenerationResponse {
            input_tokens: self.estimate_tokens(&request.prompt),
            output_tokens: self.estimate_tokens(&text),
            text,
            provider: self.name().to_string(),
            model: self.model.clone(),
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "replay"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_schema_mode(&self) -> bool {
        true
    }
}

/// Factory for [`ReplayProvider`].
pub struct ReplayProviderFactory;

impl ProviderFactory for ReplayProviderFactory {
    fn provider_type(&self) -> &'static str {
        "replay"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(ReplayProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        validate(config)
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "model": "replay", "responses": {} })
    }

    fn description(&self) -> &'static str {
        "Offline provider replaying canned responses per request label"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider(config: JsonValue) -> ReplayProvider {
        ReplayProvider::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_replays_text_by_label() {
        let p = provider(json!({ "responses": { "draft": "Some draft prose." } }));
        let response = p
            .generate(&GenerationRequest::new("draft", "prompt text"))
            .await
            .unwrap();
        assert_eq!(response.text, "Some draft prose.");
        assert_eq!(response.provider, "replay");
        assert_eq!(response.model, "replay");
    }

    #[tokio::test]
    async fn test_sequence_then_last_repeats() {
        let p = provider(json!({
            "responses": { "structure": [{ "error": "timeout" }, { "json": { "a": 1 } }] }
        }));
        let request = GenerationRequest::new("structure", "convert");
        assert!(matches!(
            p.generate(&request).await,
            Err(ProviderError::Timeout(_))
        ));
        assert_eq!(p.generate(&request).await.unwrap().text, r#"{"a":1}"#);
        assert_eq!(p.generate(&request).await.unwrap().text, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_missing_label_is_not_configured() {
        let p = provider(json!({}));
        let err = p
            .generate(&GenerationRequest::new("critique", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn test_replayed_error_kinds_classify() {
        let timeout = Duration::from_secs(1);
        assert!(replayed_error("server", timeout).default_class().is_transient());
        assert!(!replayed_error("auth", timeout).default_class().is_transient());
        assert!(!replayed_error("bad_request", timeout)
            .default_class()
            .is_transient());
    }
}
