//! Validation & repair cascade.
//!
//! Normalizes any structured candidate, however malformed, into a
//! [`StructuredResult`] that satisfies the result schema. Every change is
//! recorded as a [`Repair`] so the escalation engine can weigh it.
//!
//! Order matters:
//! 1. Filter the source list (shape, id format, duplicates)
//! 2. Normalize options and the recommended action
//! 3. Strip citations that do not resolve
//! 4. Inject retrieved sources up to the minimum count
//! 5. Pad options to three (citing the final source list)
//! 6. Default the summary and reflection prompts
//! 7. Clamp confidence, apply injection penalties, floor

mod options;
mod sources;

pub use sources::SourceRejection;

pub(crate) use options::{default_action, pad_options};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::fmt;

use crate::types::{Field, RetrievedSource, StructuredResult};
use options::{normalize_action, normalize_options, string_list};
use sources::{injection_candidates, strip_unresolved, validate_sources};

/// Every repaired result has exactly this many options.
pub const OPTION_COUNT: usize = 3;

/// Lowest confidence any result may carry.
pub const CONFIDENCE_FLOOR: f64 = 0.30;

const MIN_REFLECTION_PROMPTS: usize = 2;
const MAX_REFLECTION_PROMPTS: usize = 3;

pub(crate) const DEFAULT_SUMMARY: &str = "This situation involves competing obligations. The options below \
    set out different ways of weighing them, each grounded in the cited sources.";

pub(crate) const DEFAULT_REFLECTION_PROMPTS: [&str; 2] = [
    "Which of your obligations here would you regret neglecting most?",
    "How would you act if the outcome were not yours to control?",
];

/// Tunables for the cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairPolicy {
    /// Minimum number of cited sources before injection kicks in
    pub min_sources: usize,

    /// Confidence subtracted per injected citation
    pub injection_penalty: f64,

    /// Confidence assumed when the candidate carries none
    pub default_confidence: f64,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            min_sources: 2,
            injection_penalty: 0.05,
            default_confidence: 0.5,
        }
    }
}

/// What the cascade did to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    /// Field was missing and a safe default was substituted
    Defaulted,
    /// Field had the wrong type and was converted
    Coerced,
    /// Extra entries were removed
    Trimmed,
    /// Entries were generated to reach a minimum count
    Synthesized,
    /// Invalid entries were removed
    Dropped,
    /// Unresolved citations were removed
    Stripped,
    /// Retrieved sources were added as citations
    Injected,
    /// A number was forced into range
    Clamped,
}

/// One change made by the cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repair {
    pub field: Field,
    pub action: RepairAction,
    pub detail: String,
}

impl Repair {
    pub fn new(field: Field, action: RepairAction, detail: impl Into<String>) -> Self {
        Self {
            field,
            action,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}): {}", self.field, self.action, self.detail)
    }
}

/// Result of running the cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub result: StructuredResult,
    pub repairs: Vec<Repair>,
    /// Number of citations injected from retrieved sources
    pub injected_sources: usize,
}

impl RepairOutcome {
    /// Distinct fields that needed repair, excluding citation injection.
    ///
    /// Injection is already penalized per citation, so it does not count
    /// toward tier penalties.
    pub fn repaired_fields(&self) -> BTreeSet<Field> {
        self.repairs
            .iter()
            .filter(|r| r.action != RepairAction::Injected)
            .map(|r| r.field)
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.repairs.is_empty()
    }
}

/// Repair a structured candidate against the retrieved sources.
///
/// Never fails: anything unusable is replaced by a documented default.
pub fn repair(
    candidate: &JsonValue,
    retrieved: &[RetrievedSource],
    policy: &RepairPolicy,
) -> RepairOutcome {
    let mut repairs = Vec::new();

    let empty = serde_json::Map::new();
    let obj = match candidate.as_object() {
        Some(obj) => obj,
        None => {
            repairs.push(Repair::new(
                Field::Options,
                RepairAction::Defaulted,
                "candidate is not an object",
            ));
            &empty
        }
    };

    let mut sources = validate_sources(obj.get("sources"), retrieved, &mut repairs);
    let mut options = normalize_options(obj.get("options"), &mut repairs);
    let mut action = normalize_action(obj.get("recommended_action"), &mut repairs);

    for (i, option) in options.iter_mut().enumerate() {
        let owner = format!("option {}", i + 1);
        strip_unresolved(&mut option.sources, &sources, &owner, &mut repairs);
    }
    strip_unresolved(
        &mut action.sources,
        &sources,
        "recommended action",
        &mut repairs,
    );

    let mut injected = 0;
    if sources.len() < policy.min_sources {
        let needed = policy.min_sources - sources.len();
        for source in injection_candidates(retrieved, &sources)
            .into_iter()
            .take(needed)
        {
            repairs.push(Repair::new(
                Field::Sources,
                RepairAction::Injected,
                format!("injected retrieved source '{}'", source.id),
            ));
            if !action.sources.contains(&source.id) {
                action.sources.push(source.id.clone());
            }
            sources.push(source.to_source_ref());
            injected += 1;
        }
    }

    pad_options(&mut options, &sources, &mut repairs);

    let executive_summary = obj
        .get("executive_summary")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            repairs.push(Repair::new(
                Field::ExecutiveSummary,
                RepairAction::Defaulted,
                "executive summary missing or empty",
            ));
            DEFAULT_SUMMARY.to_string()
        });

    let reflection_prompts = repair_reflection_prompts(obj.get("reflection_prompts"), &mut repairs);

    let confidence = repair_confidence(obj.get("confidence"), injected, policy, &mut repairs);

    let title = obj
        .get("title")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let scholar_flag = obj
        .get("scholar_flag")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);

    if !repairs.is_empty() {
        tracing::debug!(
            repairs = repairs.len(),
            injected,
            "repaired structured candidate"
        );
    }

    RepairOutcome {
        result: StructuredResult {
            title,
            executive_summary,
            options,
            recommended_action: action,
            reflection_prompts,
            sources,
            confidence,
            scholar_flag,
        },
        repairs,
        injected_sources: injected,
    }
}

fn repair_reflection_prompts(value: Option<&JsonValue>, repairs: &mut Vec<Repair>) -> Vec<String> {
    let (mut prompts, coerced) = string_list(value);
    if coerced {
        repairs.push(Repair::new(
            Field::ReflectionPrompts,
            RepairAction::Coerced,
            "reflection prompts were not a list of strings",
        ));
    }

    if prompts.len() < MIN_REFLECTION_PROMPTS {
        let action = if prompts.is_empty() {
            RepairAction::Defaulted
        } else {
            RepairAction::Synthesized
        };
        for default in DEFAULT_REFLECTION_PROMPTS {
            if prompts.len() >= MIN_REFLECTION_PROMPTS {
                break;
            }
            if !prompts.iter().any(|p| p == default) {
                prompts.push(default.to_string());
            }
        }
        repairs.push(Repair::new(
            Field::ReflectionPrompts,
            action,
            "too few reflection prompts",
        ));
    }

    if prompts.len() > MAX_REFLECTION_PROMPTS {
        repairs.push(Repair::new(
            Field::ReflectionPrompts,
            RepairAction::Trimmed,
            format!(
                "{} reflection prompts trimmed to {}",
                prompts.len(),
                MAX_REFLECTION_PROMPTS
            ),
        ));
        prompts.truncate(MAX_REFLECTION_PROMPTS);
    }
    prompts
}

/// Confidence is clamped to [0, 1] before penalties and floored after.
fn repair_confidence(
    value: Option<&JsonValue>,
    injected: usize,
    policy: &RepairPolicy,
    repairs: &mut Vec<Repair>,
) -> f64 {
    let raw = match value.and_then(JsonValue::as_f64) {
        Some(raw) => raw,
        None => {
            repairs.push(Repair::new(
                Field::Confidence,
                RepairAction::Defaulted,
                format!("confidence missing, assumed {}", policy.default_confidence),
            ));
            policy.default_confidence
        }
    };

    let clamped = raw.clamp(0.0, 1.0);
    if clamped != raw {
        repairs.push(Repair::new(
            Field::Confidence,
            RepairAction::Clamped,
            format!("confidence {raw} clamped to {clamped}"),
        ));
    }

    let penalized = clamped - policy.injection_penalty * injected as f64;
    penalized.clamp(CONFIDENCE_FLOOR, 1.0)
}
