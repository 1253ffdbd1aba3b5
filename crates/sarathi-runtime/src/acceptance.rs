//! Two-stage acceptance gate.
//!
//! Stage A is the deterministic [`HeuristicGate`] from core. Stage B asks a
//! backend for a category label, and only runs when Stage A passed, a
//! backend was supplied, and `model_check` is on.
//!
//! Stage B fails open: an unparseable label or a failed call is an
//! accepted case with the reason recorded, never an error.

use sarathi_core::{
    parse_classification, rejection_template, AcceptanceDecision, FailOpenReason, HeuristicGate,
};

use crate::cache::VerdictCache;
use crate::config::AcceptanceConfig;
use crate::prompts::{
    classification_prompt, explanation_prompt, CLASSIFIER_SYSTEM_PROMPT,
    EXPLANATION_SYSTEM_PROMPT,
};
use crate::providers::{GenerationRequest, GenerationResponse};
use crate::resilience::GuardedProvider;

/// Explanation calls retry at most once.
const EXPLANATION_RETRIES: u32 = 1;
const EXPLANATION_MAX_TOKENS: u32 = 256;

/// Gate decision plus what it cost.
#[derive(Debug, Clone)]
pub struct GateVerdict {
    pub decision: AcceptanceDecision,
    /// Classifier response, when Stage B called a backend
    pub response: Option<GenerationResponse>,
    /// Stage B answered from the verdict cache
    pub cached: bool,
}

/// User-facing rejection message.
#[derive(Debug, Clone)]
pub struct Explanation {
    pub message: String,
    pub response: Option<GenerationResponse>,
    /// The static per-category template was used
    pub templated: bool,
}

#[derive(Debug)]
pub struct AcceptanceGate {
    heuristics: HeuristicGate,
    config: AcceptanceConfig,
    cache: VerdictCache,
}

impl AcceptanceGate {
    pub fn new(config: AcceptanceConfig) -> Self {
        let cache = VerdictCache::new(config.cache_capacity, config.cache_ttl);
        Self {
            heuristics: HeuristicGate::new(),
            config,
            cache,
        }
    }

    /// Evaluate case text through both stages.
    pub async fn evaluate(&self, text: &str, classifier: Option<&GuardedProvider>) -> GateVerdict {
        let text = text.trim();
        let stage_a = self.heuristics.evaluate(text);
        let classifier = match classifier {
            Some(classifier) if stage_a.is_accepted() && self.config.model_check => classifier,
            _ => {
                return GateVerdict {
                    decision: stage_a,
                    response: None,
                    cached: false,
                }
            }
        };

        if let Some(decision) = self.cache.get(text).await {
            tracing::debug!(category = %decision.category, "Stage B verdict from cache");
            return GateVerdict {
                decision,
                response: None,
                cached: true,
            };
        }

        let request = GenerationRequest::new("acceptance", classification_prompt(text))
            .with_system(CLASSIFIER_SYSTEM_PROMPT)
            .with_temperature(self.config.classifier_temperature)
            .with_max_tokens(self.config.classifier_max_tokens)
            .with_timeout(self.config.classifier_timeout);

        match classifier.call(&request, 0).await {
            Ok(success) => {
                let decision = parse_classification(&success.response.text);
                match &decision.fail_open {
                    Some(reason) => {
                        tracing::warn!(reason = %reason, "Stage B ambiguous, failing open");
                    }
                    None => self.cache.insert(text, decision.clone()).await,
                }
                GateVerdict {
                    decision,
                    response: Some(success.response),
                    cached: false,
                }
            }
            Err(err) => {
                let decision =
                    AcceptanceDecision::fail_open(FailOpenReason::BackendError(err.to_string()));
                tracing::warn!(error = %err, "Stage B call failed, failing open");
                GateVerdict {
                    decision,
                    response: None,
                    cached: false,
                }
            }
        }
    }

    /// Rejection message: a short backend call, else the category template.
    pub async fn explain(
        &self,
        decision: &AcceptanceDecision,
        provider: Option<&GuardedProvider>,
    ) -> Explanation {
        let template = || Explanation {
            message: rejection_template(decision.category).to_string(),
            response: None,
            templated: true,
        };

        let Some(provider) = provider else {
            return template();
        };

        let request = GenerationRequest::new(
            "explanation",
            explanation_prompt(decision.category, &decision.reason),
        )
        .with_system(EXPLANATION_SYSTEM_PROMPT)
        .with_temperature(self.config.explanation_temperature)
        .with_max_tokens(EXPLANATION_MAX_TOKENS)
        .with_timeout(self.config.explanation_timeout);

        match provider.call(&request, EXPLANATION_RETRIES).await {
            Ok(success) if !success.response.text.trim().is_empty() => Explanation {
                message: success.response.text.trim().to_string(),
                response: Some(success.response),
                templated: false,
            },
            Ok(success) => Explanation {
                response: Some(success.response),
                ..template()
            },
            Err(err) => {
                tracing::debug!(error = %err, "Explanation call failed, using template");
                template()
            }
        }
    }

    pub fn cache(&self) -> &VerdictCache {
        &self.cache
    }
}
