//! Guarded backend calls.
//!
//! Every generation call goes through [`GuardedProvider::call`]:
//! 1. Breaker check: an open circuit rejects with no network call
//! 2. Each attempt is bounded by the request timeout
//! 3. Transient errors retry with exponential backoff, up to the stage budget
//! 4. One breaker failure is recorded once the budget is spent, or at once
//!    for a permanent error

use backon::{ExponentialBuilder, Retryable};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use super::CircuitBreaker;
use crate::config::RetryConfig;
use crate::providers::{
    ErrorClass, GenerationRequest, GenerationResponse, LlmProvider, ProviderError,
};

/// A completed call.
#[derive(Debug, Clone)]
pub struct CallSuccess {
    pub response: GenerationResponse,
    /// Attempts beyond the first
    pub retries: u32,
    pub duration: Duration,
}

/// Why a guarded call produced no response.
#[derive(Error, Debug, Clone)]
pub enum CallError {
    #[error("circuit open for provider '{provider}'")]
    CircuitOpen { provider: String },

    #[error("timed out after {timeout:?} ({retries} retries)")]
    TimedOut { timeout: Duration, retries: u32 },

    #[error("{error} ({retries} retries)")]
    Failed {
        error: ProviderError,
        class: ErrorClass,
        retries: u32,
    },
}

impl CallError {
    pub fn retries(&self) -> u32 {
        match self {
            CallError::CircuitOpen { .. } => 0,
            CallError::TimedOut { retries, .. } | CallError::Failed { retries, .. } => *retries,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::TimedOut { .. })
    }
}

/// A backend paired with its circuit breaker.
#[derive(Debug, Clone)]
pub struct GuardedProvider {
    provider: Arc<dyn LlmProvider>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
}

impl GuardedProvider {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            provider,
            breaker,
            retry,
        }
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn supports_schema_mode(&self) -> bool {
        self.provider.supports_schema_mode()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Issue `request`, retrying transient failures up to `retries` times.
    pub async fn call(
        &self,
        request: &GenerationRequest,
        retries: u32,
    ) -> Result<CallSuccess, CallError> {
        if !self.breaker.allow_request() {
            tracing::warn!(
                provider = self.name(),
                label = request.label,
                "Call rejected: circuit open"
            );
            return Err(CallError::CircuitOpen {
                provider: self.name().to_string(),
            });
        }

        let started = Instant::now();
        let attempts = AtomicU32::new(0);
        let provider = &self.provider;
        let counter = &attempts;

        let attempt = || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            match tokio::time::timeout(request.timeout, provider.generate(request)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(request.timeout)),
            }
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry.min_delay)
            .with_max_delay(self.retry.max_delay)
            .with_max_times(retries as usize);

        let result = attempt
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(|e: &ProviderError| provider.classify_error(e).is_transient())
            .notify(|e: &ProviderError, delay: Duration| {
                tracing::warn!(
                    provider = provider.name(),
                    label = request.label,
                    attempt = counter.load(Ordering::SeqCst),
                    error = %e,
                    ?delay,
                    "Transient provider error, retrying"
                );
            })
            .await;

        let retries_used = attempts.load(Ordering::SeqCst).saturating_sub(1);
        match result {
            Ok(response) => {
                self.breaker.record_success();
                Ok(CallSuccess {
                    response,
                    retries: retries_used,
                    duration: started.elapsed(),
                })
            }
            Err(error) => {
                self.breaker.record_failure();
                let class = provider.classify_error(&error);
                tracing::warn!(
                    provider = self.name(),
                    label = request.label,
                    retries = retries_used,
                    ?class,
                    error = %error,
                    "Provider call failed"
                );
                match error {
                    ProviderError::Timeout(timeout) => Err(CallError::TimedOut {
                        timeout,
                        retries: retries_used,
                    }),
                    error => Err(CallError::Failed {
                        error,
                        class,
                        retries: retries_used,
                    }),
                }
            }
        }
    }
}
