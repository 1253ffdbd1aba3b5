//! Core types for Sarathi consultations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A source excerpt supplied by the retrieval layer.
///
/// Retrieval itself happens outside this crate; the pipeline only ever
/// sees the excerpts it was handed for a case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedSource {
    /// Canonical id, e.g. "BG_2_47"
    pub id: String,

    /// Short paraphrase used as the citation gloss
    pub gloss: String,

    /// Full excerpt text, if the retriever supplied it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Retrieval relevance score (0.0 - 1.0)
    #[serde(default = "default_relevance")]
    pub relevance: f64,
}

fn default_relevance() -> f64 {
    0.5
}

impl RetrievedSource {
    /// Create a source with a gloss and relevance.
    pub fn new(id: impl Into<String>, gloss: impl Into<String>, relevance: f64) -> Self {
        Self {
            id: id.into(),
            gloss: gloss.into(),
            text: None,
            relevance,
        }
    }

    /// Convert into a citation entry for the structured result.
    pub fn to_source_ref(&self) -> SourceRef {
        SourceRef {
            id: self.id.clone(),
            gloss: self.gloss.clone(),
            relevance: self.relevance.clamp(0.0, 1.0),
        }
    }
}

/// One of the three options presented to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsultOption {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    /// Source ids cited by this option
    #[serde(default)]
    pub sources: Vec<String>,
}

/// The recommended course of action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendedAction {
    /// 1-based index into `options`
    pub option: usize,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// A cited source in the structured result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub id: String,
    pub gloss: String,
    pub relevance: f64,
}

/// The canonical structured consultation result.
///
/// After repair, `options` always has exactly three entries and every
/// citation resolves to an entry in `sources`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub executive_summary: String,
    pub options: Vec<ConsultOption>,
    pub recommended_action: RecommendedAction,
    pub reflection_prompts: Vec<String>,
    pub sources: Vec<SourceRef>,
    pub confidence: f64,
    pub scholar_flag: bool,
}

impl StructuredResult {
    /// All citation ids used anywhere in the document.
    pub fn citations(&self) -> impl Iterator<Item = &str> {
        self.options
            .iter()
            .flat_map(|o| o.sources.iter())
            .chain(self.recommended_action.sources.iter())
            .map(String::as_str)
    }

    /// Whether every citation resolves to an entry in `sources`.
    pub fn citations_resolve(&self) -> bool {
        self.citations()
            .all(|id| self.sources.iter().any(|s| s.id == id))
    }
}

/// Top-level fields of the structured result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    ExecutiveSummary,
    Options,
    RecommendedAction,
    ReflectionPrompts,
    Sources,
    Confidence,
    ScholarFlag,
    Title,
}

impl Field {
    /// Every field, in schema order.
    pub const ALL: [Field; 8] = [
        Field::Title,
        Field::ExecutiveSummary,
        Field::Options,
        Field::RecommendedAction,
        Field::ReflectionPrompts,
        Field::Sources,
        Field::Confidence,
        Field::ScholarFlag,
    ];

    /// JSON key for this field.
    pub fn key(&self) -> &'static str {
        match self {
            Field::ExecutiveSummary => "executive_summary",
            Field::Options => "options",
            Field::RecommendedAction => "recommended_action",
            Field::ReflectionPrompts => "reflection_prompts",
            Field::Sources => "sources",
            Field::Confidence => "confidence",
            Field::ScholarFlag => "scholar_flag",
            Field::Title => "title",
        }
    }

    /// Importance tier used for escalation and penalties.
    pub fn tier(&self) -> FieldTier {
        match self {
            Field::Options | Field::RecommendedAction | Field::ExecutiveSummary => {
                FieldTier::Critical
            }
            Field::ReflectionPrompts => FieldTier::Important,
            _ => FieldTier::Optional,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Field importance tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTier {
    Critical,
    Important,
    Optional,
}

/// Outcome category of the acceptance gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceCategory {
    Accepted,
    NotDilemma,
    UnethicalCore,
    TooVague,
    HarmfulIntent,
    FormatError,
}

impl AcceptanceCategory {
    /// Every category, accepted first.
    pub const ALL: [AcceptanceCategory; 6] = [
        AcceptanceCategory::Accepted,
        AcceptanceCategory::NotDilemma,
        AcceptanceCategory::UnethicalCore,
        AcceptanceCategory::TooVague,
        AcceptanceCategory::HarmfulIntent,
        AcceptanceCategory::FormatError,
    ];

    /// Wire label, as the classifier is asked to emit it.
    pub fn label(&self) -> &'static str {
        match self {
            AcceptanceCategory::Accepted => "accepted",
            AcceptanceCategory::NotDilemma => "not_dilemma",
            AcceptanceCategory::UnethicalCore => "unethical_core",
            AcceptanceCategory::TooVague => "too_vague",
            AcceptanceCategory::HarmfulIntent => "harmful_intent",
            AcceptanceCategory::FormatError => "format_error",
        }
    }

    /// Parse a wire label (case-insensitive, tolerant of spaces and dashes).
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Self::ALL.into_iter().find(|c| c.label() == normalized)
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, AcceptanceCategory::Accepted)
    }
}

impl fmt::Display for AcceptanceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which acceptance check produced a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStage {
    /// Stage 1: deterministic heuristics
    Heuristic,
    /// Stage 2: model-assessed classification
    ModelAssessed,
}

impl CheckStage {
    pub fn number(&self) -> u8 {
        match self {
            CheckStage::Heuristic => 1,
            CheckStage::ModelAssessed => 2,
        }
    }
}

/// Why an ambiguous Stage B classification was treated as accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailOpenReason {
    /// The classifier's response carried no recognizable label
    Unparseable(String),
    /// The classifier call itself failed
    BackendError(String),
}

impl fmt::Display for FailOpenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailOpenReason::Unparseable(raw) => write!(f, "unparseable classifier response: {raw}"),
            FailOpenReason::BackendError(err) => write!(f, "classifier call failed: {err}"),
        }
    }
}

/// Decision of the acceptance gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceDecision {
    pub category: AcceptanceCategory,

    /// Stage that rejected the text, `None` when accepted
    pub failed_stage: Option<CheckStage>,

    pub reason: String,

    /// Set when Stage B was ambiguous and the gate failed open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_open: Option<FailOpenReason>,
}

impl AcceptanceDecision {
    pub fn accepted(reason: impl Into<String>) -> Self {
        Self {
            category: AcceptanceCategory::Accepted,
            failed_stage: None,
            reason: reason.into(),
            fail_open: None,
        }
    }

    pub fn rejected(
        category: AcceptanceCategory,
        stage: CheckStage,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            category,
            failed_stage: Some(stage),
            reason: reason.into(),
            fail_open: None,
        }
    }

    /// Accept a case whose Stage B verdict could not be determined.
    ///
    /// Infrastructure faults and malformed classifier output must never
    /// block a user, so ambiguity resolves to acceptance.
    pub fn fail_open(reason: FailOpenReason) -> Self {
        Self {
            category: AcceptanceCategory::Accepted,
            failed_stage: None,
            reason: format!("accepted (fail open): {reason}"),
            fail_open: Some(reason),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.category.is_accepted()
    }
}
