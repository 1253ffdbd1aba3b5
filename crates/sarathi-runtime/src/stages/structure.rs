//! Structure runner: prose to a structured candidate.
//!
//! Requests are schema-constrained. Backends with native schema mode get
//! the schema as a request parameter; the rest get it spelled out in the
//! prompt. Either way the response is parsed leniently here and repaired
//! later, so a schema violation is logged, not fatal.

use sarathi_core::extract_json_object;
use sarathi_core::schema::{result_schema, violation_count};

use super::{PassName, PassOutcome, PassPayload, StageAttempt};
use crate::config::StageSettings;
use crate::prompts::STRUCTURE_SYSTEM_PROMPT;
use crate::providers::GenerationRequest;
use crate::resilience::GuardedProvider;

#[derive(Debug, Clone, Copy)]
pub struct StructureRunner<'a> {
    provider: &'a GuardedProvider,
}

impl<'a> StructureRunner<'a> {
    pub fn new(provider: &'a GuardedProvider) -> Self {
        Self { provider }
    }

    /// One structure attempt at `temperature`.
    ///
    /// `pass` is [`PassName::Structure`] for the primary and
    /// [`PassName::Escalation`] for the secondary.
    pub async fn attempt(
        &self,
        pass: PassName,
        prompt: String,
        settings: &StageSettings,
        temperature: f32,
    ) -> StageAttempt {
        let mut request = GenerationRequest::new(pass.label(), prompt)
            .with_system(STRUCTURE_SYSTEM_PROMPT)
            .with_temperature(temperature)
            .with_max_tokens(settings.max_tokens)
            .with_timeout(settings.timeout);
        match result_schema() {
            Ok(schema) => request = request.with_schema(schema.clone()),
            Err(e) => tracing::error!(error = %e, "Result schema unavailable, requesting free text"),
        }

        tracing::debug!(
            pass = %pass,
            provider = self.provider.name(),
            native_schema = self.provider.supports_schema_mode(),
            temperature,
            "Structure attempt"
        );

        let started = tokio::time::Instant::now();
        let result = self.provider.call(&request, settings.retries).await;
        let mut attempt = StageAttempt::from_call(pass, &request, result, started);

        if let PassOutcome::Success(PassPayload::Text(text)) = &attempt.outcome {
            attempt.outcome = match extract_json_object(text) {
                Some(candidate) => {
                    let violations = violation_count(&candidate);
                    if violations > 0 {
                        tracing::warn!(
                            pass = %pass,
                            provider = self.provider.name(),
                            violations,
                            "Structure candidate violates schema; repair will normalize it"
                        );
                    }
                    attempt.schema_violations = Some(violations);
                    PassOutcome::Success(PassPayload::Structured(candidate))
                }
                None => {
                    tracing::warn!(
                        pass = %pass,
                        provider = self.provider.name(),
                        "Structure response contained no JSON object"
                    );
                    PassOutcome::Error("no JSON object in structure response".to_string())
                }
            };
        }
        attempt
    }
}
