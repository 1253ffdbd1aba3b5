//! Escalation engine: field-aware quality gates and graduated penalties.
//!
//! Rules:
//! 1. Pre-repair: any CRITICAL field missing or empty → escalate
//! 2. Pre-repair: two or more IMPORTANT fields missing or empty → escalate
//! 3. Post-repair: confidence below threshold after penalties → escalate
//!
//! The engine only decides. Issuing the secondary call is the
//! orchestrator's job.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::fmt;

use crate::repair::CONFIDENCE_FLOOR;
use crate::types::{Field, FieldTier};

/// Escalation tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationPolicy {
    pub enabled: bool,

    /// Post-repair confidence below this escalates
    pub threshold: f64,

    pub critical_penalty: f64,
    pub important_penalty: f64,
    pub optional_penalty: f64,

    /// Penalized confidence never drops below this
    pub floor: f64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.45,
            critical_penalty: 0.30,
            important_penalty: 0.15,
            optional_penalty: 0.05,
            floor: CONFIDENCE_FLOOR,
        }
    }
}

impl EscalationPolicy {
    pub fn penalty_for(&self, tier: FieldTier) -> f64 {
        match tier {
            FieldTier::Critical => self.critical_penalty,
            FieldTier::Important => self.important_penalty,
            FieldTier::Optional => self.optional_penalty,
        }
    }
}

/// Why a run was redirected to the secondary backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum EscalationReason {
    MissingCriticalField { field: Field },
    MissingImportantFields { fields: Vec<Field> },
    LowConfidence { confidence: f64, threshold: f64 },
}

impl EscalationReason {
    /// Stable reason code recorded on escalation events.
    pub fn code(&self) -> &'static str {
        match self {
            EscalationReason::MissingCriticalField { .. } => "missing_critical_field",
            EscalationReason::MissingImportantFields { .. } => "missing_important_fields",
            EscalationReason::LowConfidence { .. } => "low_confidence",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationReason::MissingCriticalField { field } => {
                write!(f, "critical field '{field}' missing or empty")
            }
            EscalationReason::MissingImportantFields { fields } => {
                let names: Vec<&str> = fields.iter().map(Field::key).collect();
                write!(f, "important fields missing: {}", names.join(", "))
            }
            EscalationReason::LowConfidence {
                confidence,
                threshold,
            } => write!(f, "confidence {confidence:.2} below {threshold:.2}"),
        }
    }
}

/// Confidence after tier penalties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyOutcome {
    pub confidence: f64,
    /// Sum of penalties before flooring
    pub total_penalty: f64,
    pub penalized_fields: Vec<Field>,
}

/// Field-aware escalation decisions.
#[derive(Debug, Clone, Default)]
pub struct EscalationEngine {
    policy: EscalationPolicy,
}

impl EscalationEngine {
    pub fn new(policy: EscalationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    /// Check a raw candidate before repair.
    pub fn should_escalate_pre_repair(&self, candidate: &JsonValue) -> Option<EscalationReason> {
        if !self.policy.enabled {
            return None;
        }

        let missing: Vec<Field> = Field::ALL
            .into_iter()
            .filter(|field| is_missing(candidate.get(field.key())))
            .collect();

        if let Some(field) = missing
            .iter()
            .find(|f| f.tier() == FieldTier::Critical)
        {
            return Some(EscalationReason::MissingCriticalField { field: *field });
        }

        let important: Vec<Field> = missing
            .into_iter()
            .filter(|f| f.tier() == FieldTier::Important)
            .collect();
        if important.len() >= 2 {
            return Some(EscalationReason::MissingImportantFields { fields: important });
        }

        None
    }

    /// Check confidence after repair and tier penalties.
    pub fn should_escalate_post_repair(&self, confidence: f64) -> bool {
        self.policy.enabled && confidence < self.policy.threshold
    }

    /// Reason for a post-repair escalation.
    pub fn low_confidence(&self, confidence: f64) -> EscalationReason {
        EscalationReason::LowConfidence {
            confidence,
            threshold: self.policy.threshold,
        }
    }

    /// Apply one tier penalty per distinct repaired field.
    ///
    /// `max(base - sum(penalties), floor)`, capped at 1.0.
    pub fn apply_tier_penalties(
        &self,
        confidence: f64,
        repaired: &BTreeSet<Field>,
    ) -> PenaltyOutcome {
        let total_penalty: f64 = repaired
            .iter()
            .map(|f| self.policy.penalty_for(f.tier()))
            .sum();
        let confidence = (confidence - total_penalty).max(self.policy.floor).min(1.0);
        PenaltyOutcome {
            confidence,
            total_penalty,
            penalized_fields: repaired.iter().copied().collect(),
        }
    }
}

/// Missing, null, or empty (string, list, object).
fn is_missing(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => true,
        Some(JsonValue::String(s)) => s.trim().is_empty(),
        Some(JsonValue::Array(a)) => a.is_empty(),
        Some(JsonValue::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn full_candidate() -> JsonValue {
        json!({
            "executive_summary": "Summary",
            "options": [{ "title": "A" }],
            "recommended_action": { "option": 1 },
            "reflection_prompts": ["Why?"],
            "sources": [],
            "confidence": 0.8
        })
    }

    #[test]
    fn test_complete_candidate_does_not_escalate() {
        let engine = EscalationEngine::default();
        assert_eq!(engine.should_escalate_pre_repair(&full_candidate()), None);
    }

    #[test]
    fn test_missing_critical_field_escalates() {
        let engine = EscalationEngine::default();
        let mut candidate = full_candidate();
        candidate["options"] = json!([]);
        candidate["executive_summary"] = json!("  ");
        let reason = engine.should_escalate_pre_repair(&candidate).unwrap();
        // First missing field in schema order
        assert_eq!(
            reason,
            EscalationReason::MissingCriticalField {
                field: Field::ExecutiveSummary
            }
        );
        assert_eq!(reason.code(), "missing_critical_field");
    }

    #[test]
    fn test_single_missing_important_field_does_not_escalate() {
        let engine = EscalationEngine::default();
        let mut candidate = full_candidate();
        candidate["reflection_prompts"] = JsonValue::Null;
        assert_eq!(engine.should_escalate_pre_repair(&candidate), None);
    }

    #[test]
    fn test_disabled_never_escalates() {
        let engine = EscalationEngine::new(EscalationPolicy {
            enabled: false,
            ..Default::default()
        });
        assert_eq!(engine.should_escalate_pre_repair(&json!({})), None);
        assert!(!engine.should_escalate_post_repair(0.30));
    }

    #[test]
    fn test_post_repair_threshold() {
        let engine = EscalationEngine::default();
        assert!(engine.should_escalate_post_repair(0.44));
        assert!(!engine.should_escalate_post_repair(0.45));
    }

    #[test]
    fn test_tier_penalties_sum_and_floor() {
        let engine = EscalationEngine::default();
        let fields: BTreeSet<Field> = [Field::ReflectionPrompts, Field::Sources].into();
        let outcome = engine.apply_tier_penalties(0.9, &fields);
        assert!((outcome.total_penalty - 0.20).abs() < 1e-9);
        assert!((outcome.confidence - 0.70).abs() < 1e-9);

        // A single critical repair on a low base lands on the floor.
        let fields: BTreeSet<Field> = [Field::Options].into();
        let outcome = engine.apply_tier_penalties(0.5, &fields);
        assert_eq!(outcome.confidence, CONFIDENCE_FLOOR);
    }

    proptest! {
        #[test]
        fn prop_penalized_confidence_in_range(
            base in 0.0f64..=1.0,
            picks in prop::collection::btree_set(0usize..8, 0..8),
        ) {
            let engine = EscalationEngine::default();
            let fields: BTreeSet<Field> = picks.into_iter().map(|i| Field::ALL[i]).collect();
            let outcome = engine.apply_tier_penalties(base, &fields);
            prop_assert!(outcome.confidence >= CONFIDENCE_FLOOR);
            prop_assert!(outcome.confidence <= 1.0);
        }

        #[test]
        fn prop_present_critical_fields_never_escalate(drop_prompts in any::<bool>(), drop_title in any::<bool>()) {
            let engine = EscalationEngine::default();
            let mut candidate = full_candidate();
            if drop_prompts {
                candidate.as_object_mut().unwrap().remove("reflection_prompts");
            }
            if drop_title {
                candidate.as_object_mut().unwrap().remove("title");
            }
            prop_assert_eq!(engine.should_escalate_pre_repair(&candidate), None);
        }
    }
}
