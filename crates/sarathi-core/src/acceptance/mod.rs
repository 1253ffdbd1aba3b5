//! Acceptance gate: deterministic Stage A and the Stage B label parser.
//!
//! Stage A never calls a backend. Stage B (the model-assessed check) runs
//! in the runtime; this module only owns how its response is interpreted.
//!
//! | Stage | Rejects with | Condition |
//! |-------|--------------|-----------|
//! | A | `format_error` | length outside [50, 5000] chars, spam signature |
//! | A | `not_dilemma` | no tension and no decision language (Latin text only) |
//! | A | `too_vague` | some but not all dilemma markers (Latin text only) |
//! | B | any category | classifier label other than `accepted` |

mod heuristics;

pub use heuristics::{
    char_len, detect_spam, is_non_latin, DilemmaMarkers, SpamSignature, MAX_CHARS, MIN_CHARS,
};

use serde_json::Value as JsonValue;

use crate::json::extract_json_object;
use crate::types::{AcceptanceCategory, AcceptanceDecision, CheckStage, FailOpenReason};

/// Stage A: deterministic acceptance checks.
#[derive(Debug, Clone, Default)]
pub struct HeuristicGate;

impl HeuristicGate {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate case text without any backend call.
    pub fn evaluate(&self, text: &str) -> AcceptanceDecision {
        let text = text.trim();
        let len = char_len(text);

        if !(MIN_CHARS..=MAX_CHARS).contains(&len) {
            return AcceptanceDecision::rejected(
                AcceptanceCategory::FormatError,
                CheckStage::Heuristic,
                format!(
                    "text must be between {} and {} characters (got {})",
                    MIN_CHARS, MAX_CHARS, len
                ),
            );
        }

        if let Some(signature) = detect_spam(text) {
            return AcceptanceDecision::rejected(
                AcceptanceCategory::FormatError,
                CheckStage::Heuristic,
                format!("text looks like spam: {}", signature.describe()),
            );
        }

        // Marker patterns are English; other scripts are left to Stage B.
        if is_non_latin(text) {
            tracing::debug!("non-Latin script detected, deferring dilemma check");
            return AcceptanceDecision::accepted(
                "non-Latin script; dilemma check deferred to model assessment",
            );
        }

        let markers = DilemmaMarkers::detect(text);
        if markers.complete() {
            return AcceptanceDecision::accepted("heuristic checks passed");
        }

        let category = if !markers.tension && !markers.decision {
            AcceptanceCategory::NotDilemma
        } else {
            AcceptanceCategory::TooVague
        };

        AcceptanceDecision::rejected(
            category,
            CheckStage::Heuristic,
            format!("missing dilemma markers: {}", markers.missing().join(", ")),
        )
    }
}

/// Interpret a Stage B classifier response.
///
/// Accepts either a JSON object `{"category": .., "reason": ..}` or a bare
/// label anywhere in the text. Anything else takes the fail-open path.
pub fn parse_classification(raw: &str) -> AcceptanceDecision {
    let (category, reason) = match classify_json(raw).or_else(|| classify_text(raw)) {
        Some(found) => found,
        None => return AcceptanceDecision::fail_open(FailOpenReason::Unparseable(excerpt(raw))),
    };

    if category.is_accepted() {
        return AcceptanceDecision::accepted(
            reason.unwrap_or_else(|| "model classification: accepted".to_string()),
        );
    }

    AcceptanceDecision::rejected(
        category,
        CheckStage::ModelAssessed,
        reason.unwrap_or_else(|| format!("model classification: {}", category)),
    )
}

fn classify_json(raw: &str) -> Option<(AcceptanceCategory, Option<String>)> {
    let value = extract_json_object(raw)?;
    let category = value
        .get("category")
        .and_then(JsonValue::as_str)
        .and_then(AcceptanceCategory::from_label)?;
    let reason = value
        .get("reason")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    Some((category, reason))
}

fn classify_text(raw: &str) -> Option<(AcceptanceCategory, Option<String>)> {
    let normalized: String = raw
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { ' ' })
        .collect();
    let tokens: Vec<&str> = normalized.split_whitespace().collect();

    // Any rejection label outranks "accepted"
    let mut accepted = false;
    for (i, token) in tokens.iter().enumerate() {
        let category = AcceptanceCategory::from_label(token).or_else(|| {
            tokens
                .get(i + 1)
                .and_then(|next| AcceptanceCategory::from_label(&format!("{token}_{next}")))
        });
        match category {
            Some(AcceptanceCategory::Accepted) => accepted = true,
            Some(category) => return Some((category, None)),
            None => {}
        }
    }
    accepted.then_some((AcceptanceCategory::Accepted, None))
}

fn excerpt(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= 80 {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(80).collect();
        format!("{cut}…")
    }
}

/// Static rejection message used when the explanation call is unavailable.
pub fn rejection_template(category: AcceptanceCategory) -> &'static str {
    match category {
        AcceptanceCategory::Accepted => "",
        AcceptanceCategory::NotDilemma => {
            "Thank you for reaching out. This reads more like a question of fact than an ethical \
             dilemma. Sarathi works best when you describe a situation where you must choose \
             between competing obligations and want help weighing them."
        }
        AcceptanceCategory::UnethicalCore => {
            "We understand that hard situations can push us toward difficult ideas. We can't help \
             plan a course of action whose core aim is to wrong someone, but we would gladly help \
             you think through the pressures behind it."
        }
        AcceptanceCategory::TooVague => {
            "We'd like to help, and we need a little more to go on. Tell us who is affected, what \
             pulls you in different directions, and what decision you are facing."
        }
        AcceptanceCategory::HarmfulIntent => {
            "We care about your wellbeing and the wellbeing of others, and we can't assist with \
             this request. If you are in danger or thinking of harming yourself or someone else, \
             please contact local emergency services or a crisis line right away."
        }
        AcceptanceCategory::FormatError => {
            "We couldn't process this submission. Please describe your situation in plain \
             sentences, between 50 and 5000 characters."
        }
    }
}
