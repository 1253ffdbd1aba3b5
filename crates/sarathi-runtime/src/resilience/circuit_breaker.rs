//! Circuit breaker to prevent cascade failures.
//!
//! One breaker per backend, shared by every consultation that uses it.
//! While open, calls are rejected before any network traffic and without
//! consuming a retry budget.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

/// State of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed { failures: u32 },

    /// All calls rejected until the recovery timeout passes
    Open { opened_at: Instant },

    /// Trial calls allowed; the next outcome decides
    HalfOpen,
}

impl CircuitState {
    pub fn label(&self) -> &'static str {
        match self {
            CircuitState::Closed { .. } => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl Serialize for CircuitState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Per-backend circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: String,
    state: RwLock<CircuitState>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            state: RwLock::new(CircuitState::Closed { failures: 0 }),
            config,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Whether a call may go out now.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to
    /// half-open and lets the call through as a trial.
    pub fn allow_request(&self) -> bool {
        if let CircuitState::Open { opened_at } = *self.state.read() {
            if opened_at.elapsed() < self.config.recovery_timeout {
                return false;
            }
        } else {
            return true;
        }

        let mut state = self.state.write();
        match *state {
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    *state = CircuitState::HalfOpen;
                    tracing::info!(
                        provider = %self.provider,
                        "Circuit transitioning to half-open for recovery test"
                    );
                    true
                } else {
                    false
                }
            }
            _ => true,
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.write();
        match *state {
            CircuitState::HalfOpen => {
                *state = CircuitState::Closed { failures: 0 };
                tracing::info!(provider = %self.provider, "Circuit closed after successful recovery");
            }
            CircuitState::Closed { failures } if failures > 0 => {
                *state = CircuitState::Closed { failures: 0 };
            }
            // A call that started before the circuit opened does not close it.
            _ => {}
        }
    }

    /// Record one failed call (after the caller's own retries).
    pub fn record_failure(&self) {
        let mut state = self.state.write();
        match *state {
            CircuitState::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.config.failure_threshold {
                    *state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                    tracing::warn!(
                        provider = %self.provider,
                        failures,
                        "Circuit opened after repeated failures"
                    );
                } else {
                    *state = CircuitState::Closed { failures };
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
                tracing::warn!(
                    provider = %self.provider,
                    "Circuit reopened after failed recovery attempt"
                );
            }
            CircuitState::Open { .. } => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read()
    }

    /// Consecutive failures recorded while closed.
    pub fn failures(&self) -> u32 {
        match *self.state.read() {
            CircuitState::Closed { failures } => failures,
            _ => 0,
        }
    }

    pub fn reset(&self) {
        *self.state.write() = CircuitState::Closed { failures: 0 };
    }
}
