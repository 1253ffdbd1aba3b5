//! # sarathi-core
//!
//! Deterministic logic of the Sarathi consultation pipeline.
//!
//! This crate answers, without ever calling a generation backend:
//! - Should this case be consulted on at all? (Stage A of the acceptance gate)
//! - Is this structured candidate good enough, and how is it made canonical?
//! - Can prose be turned into a structured result when the model could not?
//! - Should this run be redirected to a secondary backend?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same input always produces same output
//! 2. **No LLM calls**: Everything here is rule-based
//! 3. **Canonical output**: Repaired results always have three options,
//!    resolvable citations, and confidence in [0.30, 1.0]
//!
//! ## Example
//!
//! ```rust,ignore
//! use sarathi_core::{repair, EscalationEngine, RepairPolicy};
//!
//! let candidate: serde_json::Value = serde_json::from_str(&model_output)?;
//! let engine = EscalationEngine::default();
//! if let Some(reason) = engine.should_escalate_pre_repair(&candidate) {
//!     println!("escalate: {}", reason);
//! }
//! let outcome = repair(&candidate, &sources, &RepairPolicy::default());
//! let penalized = engine.apply_tier_penalties(
//!     outcome.result.confidence,
//!     &outcome.repaired_fields(),
//! );
//! ```

pub mod acceptance;
pub mod escalation;
pub mod json;
pub mod patterns;
pub mod reconstruct;
pub mod repair;
pub mod schema;
pub mod types;

// Re-export main types at crate root
pub use acceptance::{parse_classification, rejection_template, HeuristicGate};
pub use escalation::{EscalationEngine, EscalationPolicy, EscalationReason, PenaltyOutcome};
pub use json::extract_json_object;
pub use reconstruct::{
    generic_template, Reconstruction, ReconstructionError, ReconstructionFailure,
    ReconstructionMethod, Reconstructor,
};
pub use repair::{repair, Repair, RepairAction, RepairOutcome, RepairPolicy, CONFIDENCE_FLOOR};
pub use schema::{validate_result, SchemaError, SCHEMA_VERSION};
pub use types::{
    AcceptanceCategory, AcceptanceDecision, CheckStage, ConsultOption, FailOpenReason, Field,
    FieldTier, RecommendedAction, RetrievedSource, SourceRef, StructuredResult,
};
