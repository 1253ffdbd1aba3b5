//! # sarathi-runtime
//!
//! Async consultation pipeline for Sarathi.
//!
//! This crate sequences the generative side of a consultation:
//! - Two-stage acceptance gate (heuristics from `sarathi-core`, then a
//!   fail-open model classification with a verdict cache)
//! - Draft, critique, refine, and structure stages against a primary backend
//! - Fallback reconstruction and repair when structure output is unusable
//! - Escalation to a secondary backend on missing fields or low confidence
//! - Per-provider circuit breakers with retry and backoff
//! - An append-only audit trail per stage attempt
//!
//! Everything deterministic (heuristics, reconstruction, repair, penalty
//! arithmetic) lives in `sarathi-core`; this crate only adds the calls.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sarathi_runtime::{CaseRequest, ConsultationOrchestrator, Outcome, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_yaml_file("sarathi.yaml")?;
//! let orchestrator = ConsultationOrchestrator::builder().config(config).build()?;
//!
//! let case = CaseRequest::new("case-1", title, description, sources);
//! match orchestrator.run_consultation(&case).await {
//!     Outcome::Accepted { result, .. } => println!("{}", result.executive_summary),
//!     Outcome::Rejected { message, .. } => println!("{message}"),
//!     Outcome::Failed { error, .. } => eprintln!("{error}"),
//! }
//! ```

pub mod acceptance;
pub mod audit;
pub mod cache;
pub mod config;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod stages;

#[cfg(test)]
mod test_support;

use thiserror::Error;

pub use acceptance::{AcceptanceGate, Explanation, GateVerdict};
pub use audit::{
    AuditError, AuditSink, Consultation, ConsultationStatus, EscalationEvent, InMemoryAuditStore,
    JsonlAuditSink, PassExecution, PassStatus,
};
pub use cache::VerdictCache;
pub use config::{
    AcceptanceConfig, CircuitBreakerConfig, ConfigError, PipelineMode, ProviderCapability,
    ProviderSpec, RetryConfig, RuntimeConfig, StageSettings,
};
pub use orchestrator::{CaseRequest, ConsultationOrchestrator, OrchestratorBuilder, Outcome};
pub use providers::{
    GenerationRequest, GenerationResponse, LlmProvider, ProviderError, ProviderRegistry,
};
pub use resilience::{CircuitBreaker, CircuitState, GuardedProvider, LlmUsage};
pub use stages::{PassName, PassOutcome};

/// Errors from wiring up the runtime.
///
/// Consultations themselves never return these; they end in an
/// [`Outcome`].
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("provider setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("audit sink unavailable: {0}")]
    Audit(#[from] AuditError),
}
