//! Resilience patterns for sarathi-runtime.
//!
//! This module provides:
//! - A circuit breaker per backend
//! - Guarded calls: per-attempt timeout, retry with backoff, breaker accounting
//! - Usage accounting

mod circuit_breaker;
mod guard;
mod usage;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use guard::{CallError, CallSuccess, GuardedProvider};
pub use usage::LlmUsage;
