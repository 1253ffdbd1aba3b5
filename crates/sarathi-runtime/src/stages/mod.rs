//! Stage runners.
//!
//! A runner issues one guarded generation call and reports a typed
//! [`StageAttempt`]. Recovery (fatal, placeholder, substitution, fallback)
//! is the orchestrator's decision, never the runner's.

mod structure;

pub use structure::StructureRunner;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::config::StageSettings;
use crate::prompts::BASE_SYSTEM_PROMPT;
use crate::providers::{GenerationRequest, GenerationResponse};
use crate::resilience::{CallError, GuardedProvider};

/// Audit-visible name of a pass row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassName {
    Acceptance,
    Draft,
    Critique,
    Refine,
    Structure,
    /// Secondary-backend structure call
    Escalation,
    FallbackReconstruct,
}

impl PassName {
    /// Pass number (0-4). Escalation and reconstruction belong to pass 4.
    pub fn number(&self) -> u8 {
        match self {
            PassName::Acceptance => 0,
            PassName::Draft => 1,
            PassName::Critique => 2,
            PassName::Refine => 3,
            PassName::Structure | PassName::Escalation | PassName::FallbackReconstruct => 4,
        }
    }

    /// Request label for backend calls made by this pass.
    pub fn label(&self) -> &'static str {
        match self {
            PassName::Acceptance => "acceptance",
            PassName::Draft => "draft",
            PassName::Critique => "critique",
            PassName::Refine => "refine",
            PassName::Structure => "structure",
            PassName::Escalation => "escalation",
            PassName::FallbackReconstruct => "fallback_reconstruct",
        }
    }
}

impl std::fmt::Display for PassName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// What a successful pass produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PassPayload {
    Text(String),
    Structured(JsonValue),
}

/// Result of one stage attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    Pending,
    Success(PassPayload),
    Error(String),
    Timeout,
    Skipped,
}

impl PassOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PassOutcome::Success(_))
    }

    /// Text payload of a successful prose pass.
    pub fn text(&self) -> Option<&str> {
        match self {
            PassOutcome::Success(PassPayload::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn structured(&self) -> Option<&JsonValue> {
        match self {
            PassOutcome::Success(PassPayload::Structured(value)) => Some(value),
            _ => None,
        }
    }

    /// Error text for failed outcomes.
    pub fn error(&self) -> Option<String> {
        match self {
            PassOutcome::Error(message) => Some(message.clone()),
            PassOutcome::Timeout => Some("timed out".to_string()),
            _ => None,
        }
    }
}

/// One attempted backend call with everything the audit row needs.
#[derive(Debug, Clone)]
pub struct StageAttempt {
    pub pass: PassName,
    pub outcome: PassOutcome,
    pub prompt: String,
    pub temperature: f32,
    pub retries: u32,
    pub duration: Duration,
    /// Raw response, when the backend answered
    pub response: Option<GenerationResponse>,
    /// Schema violations in a raw structure candidate
    pub schema_violations: Option<usize>,
}

impl StageAttempt {
    pub fn tokens_used(&self) -> u32 {
        self.response
            .as_ref()
            .map(GenerationResponse::total_tokens)
            .unwrap_or(0)
    }

    fn from_call(
        pass: PassName,
        request: &GenerationRequest,
        result: Result<crate::resilience::CallSuccess, CallError>,
        started: tokio::time::Instant,
    ) -> Self {
        let mut attempt = StageAttempt {
            pass,
            outcome: PassOutcome::Pending,
            prompt: request.prompt.clone(),
            temperature: request.temperature,
            retries: 0,
            duration: Duration::ZERO,
            response: None,
            schema_violations: None,
        };
        match result {
            Ok(success) => {
                attempt.retries = success.retries;
                attempt.duration = success.duration;
                let text = success.response.text.trim().to_string();
                attempt.outcome = if text.is_empty() {
                    PassOutcome::Error("backend returned an empty response".to_string())
                } else {
                    PassOutcome::Success(PassPayload::Text(text))
                };
                attempt.response = Some(success.response);
            }
            Err(err) => {
                attempt.retries = err.retries();
                attempt.duration = started.elapsed();
                attempt.outcome = if err.is_timeout() {
                    PassOutcome::Timeout
                } else {
                    PassOutcome::Error(err.to_string())
                };
            }
        }
        attempt
    }
}

/// Runs the prose stages: draft, critique, refine.
#[derive(Debug, Clone, Copy)]
pub struct StageRunner<'a> {
    provider: &'a GuardedProvider,
}

impl<'a> StageRunner<'a> {
    pub fn new(provider: &'a GuardedProvider) -> Self {
        Self { provider }
    }

    /// One prose stage call at the stage's settings.
    pub async fn run(&self, pass: PassName, prompt: String, settings: &StageSettings) -> StageAttempt {
        let request = GenerationRequest::new(pass.label(), prompt)
            .with_system(BASE_SYSTEM_PROMPT)
            .with_temperature(settings.temperature)
            .with_max_tokens(settings.max_tokens)
            .with_timeout(settings.timeout);

        let started = tokio::time::Instant::now();
        let result = self.provider.call(&request, settings.retries).await;
        let attempt = StageAttempt::from_call(pass, &request, result, started);

        match &attempt.outcome {
            PassOutcome::Success(_) => tracing::debug!(
                pass = %pass,
                provider = self.provider.name(),
                retries = attempt.retries,
                tokens = attempt.tokens_used(),
                "Stage succeeded"
            ),
            other => tracing::warn!(
                pass = %pass,
                provider = self.provider.name(),
                retries = attempt.retries,
                error = other.error().unwrap_or_default(),
                "Stage failed"
            ),
        }
        attempt
    }
}

/// Excerpt of a prompt or output for audit rows.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, RetryConfig};
    use crate::providers::ProviderError;
    use crate::resilience::CircuitBreaker;
    use crate::test_support::ScriptedProvider;
    use std::sync::Arc;

    fn guarded(provider: ScriptedProvider) -> GuardedProvider {
        GuardedProvider::new(
            Arc::new(provider),
            Arc::new(CircuitBreaker::new("scripted", CircuitBreakerConfig::default())),
            RetryConfig {
                min_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        )
    }

    fn settings() -> StageSettings {
        StageSettings::new(0.8, 512, 1, Duration::from_secs(5))
    }

    #[test]
    fn test_pass_numbers() {
        assert_eq!(PassName::Acceptance.number(), 0);
        assert_eq!(PassName::Refine.number(), 3);
        assert_eq!(PassName::Escalation.number(), 4);
        assert_eq!(PassName::FallbackReconstruct.number(), 4);
        assert_eq!(PassName::FallbackReconstruct.label(), "fallback_reconstruct");
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_stage_carries_text_and_temperature() {
        let provider = guarded(ScriptedProvider::new().text("draft", "  Some draft.  "));
        let attempt = StageRunner::new(&provider)
            .run(PassName::Draft, "prompt".into(), &settings())
            .await;
        assert_eq!(attempt.outcome.text(), Some("Some draft."));
        assert_eq!(attempt.temperature, 0.8);
        assert!(attempt.response.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_response_is_error() {
        let provider = guarded(ScriptedProvider::new().text("critique", "   "));
        let attempt = StageRunner::new(&provider)
            .run(PassName::Critique, "prompt".into(), &settings())
            .await;
        assert!(matches!(attempt.outcome, PassOutcome::Error(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_outcome_records_retries() {
        let provider = guarded(
            ScriptedProvider::new()
                .fail("refine", ProviderError::Timeout(Duration::from_secs(5))),
        );
        let attempt = StageRunner::new(&provider)
            .run(PassName::Refine, "prompt".into(), &settings())
            .await;
        assert_eq!(attempt.outcome, PassOutcome::Timeout);
        assert_eq!(attempt.retries, 1);
        assert_eq!(attempt.tokens_used(), 0);
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("ééééé", 2), "éé…");
    }
}
