//! Fallback reconstructor.
//!
//! Builds a structured result from prose when the Structure pass fails.
//! Purely algorithmic: the same prose and sources always yield the same
//! result. Reconstructed confidence is capped below anything a native
//! Structure success can reach, and every result is flagged for scholar
//! review.

pub mod extract;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::patterns::{connective_count, source_ids_in};
use crate::repair::{default_action, pad_options, DEFAULT_REFLECTION_PROMPTS, DEFAULT_SUMMARY};
use crate::types::{
    ConsultOption, RecommendedAction, RetrievedSource, SourceRef, StructuredResult,
};
use extract::{
    extract_options, extract_questions, extract_recommendation, extract_summary, extract_title,
    paragraphs,
};

/// Minimum prose length (characters) worth reconstructing from.
pub const MIN_PROSE_CHARS: usize = 400;

/// Minimum options extracted for a reconstruction to count.
pub const MIN_OPTIONS: usize = 2;

/// Starting confidence of a successful reconstruction.
pub const BASE_CONFIDENCE: f64 = 0.35;

/// Highest confidence a reconstruction can reach.
pub const MAX_CONFIDENCE: f64 = 0.60;

/// Fixed confidence of the generic template.
pub const TEMPLATE_CONFIDENCE: f64 = 0.40;

const INCREMENT: f64 = 0.05;
const TEMPLATE_SOURCE_COUNT: usize = 3;
const MAX_REFLECTION_PROMPTS: usize = 3;

/// How a fallback result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionMethod {
    RefinedProse,
    DraftProse,
    GenericTemplate,
}

impl ReconstructionMethod {
    pub fn label(&self) -> &'static str {
        match self {
            ReconstructionMethod::RefinedProse => "refined prose heuristic",
            ReconstructionMethod::DraftProse => "draft prose heuristic",
            ReconstructionMethod::GenericTemplate => "generic template",
        }
    }
}

impl fmt::Display for ReconstructionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which prose a reconstruction attempt read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProseOrigin {
    Refined,
    Draft,
}

impl ProseOrigin {
    fn method(&self) -> ReconstructionMethod {
        match self {
            ProseOrigin::Refined => ReconstructionMethod::RefinedProse,
            ProseOrigin::Draft => ReconstructionMethod::DraftProse,
        }
    }
}

/// Why one prose source could not be reconstructed.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconstructionError {
    #[error("prose too short ({len} chars, need {min})")]
    TooShort { len: usize, min: usize },

    #[error("no summary paragraph found")]
    MissingSummary,

    #[error("found {found} options, need {required}")]
    TooFewOptions { found: usize, required: usize },
}

/// Every attempt failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionFailure {
    pub reasons: Vec<(ProseOrigin, ReconstructionError)>,
}

impl fmt::Display for ReconstructionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .reasons
            .iter()
            .map(|(origin, err)| format!("{origin:?}: {err}"))
            .collect();
        write!(f, "reconstruction failed ({})", parts.join("; "))
    }
}

/// A successful reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconstruction {
    pub result: StructuredResult,
    pub method: ReconstructionMethod,
    /// Reasons earlier attempts failed (e.g. refined prose too short)
    pub skipped: Vec<(ProseOrigin, ReconstructionError)>,
}

/// Deterministic prose-to-structure reconstructor.
#[derive(Debug, Clone, Default)]
pub struct Reconstructor;

impl Reconstructor {
    pub fn new() -> Self {
        Self
    }

    /// Reconstruct from refined prose, falling back to draft prose.
    pub fn reconstruct(
        &self,
        refined: Option<&str>,
        draft: Option<&str>,
        sources: &[RetrievedSource],
    ) -> Result<Reconstruction, ReconstructionFailure> {
        let mut reasons = Vec::new();

        for (origin, prose) in [(ProseOrigin::Refined, refined), (ProseOrigin::Draft, draft)] {
            let prose = prose.unwrap_or_default();
            match self.from_prose(prose, sources) {
                Ok(result) => {
                    tracing::info!(
                        method = origin.method().label(),
                        options = result.options.len(),
                        confidence = result.confidence,
                        "reconstructed structured result from prose"
                    );
                    return Ok(Reconstruction {
                        result,
                        method: origin.method(),
                        skipped: reasons,
                    });
                }
                Err(err) => {
                    tracing::debug!(origin = ?origin, error = %err, "reconstruction attempt failed");
                    reasons.push((origin, err));
                }
            }
        }

        Err(ReconstructionFailure { reasons })
    }

    /// Reconstruct from one piece of prose.
    pub fn from_prose(
        &self,
        prose: &str,
        sources: &[RetrievedSource],
    ) -> Result<StructuredResult, ReconstructionError> {
        let prose = prose.trim();
        let len = prose.chars().count();
        if len < MIN_PROSE_CHARS {
            return Err(ReconstructionError::TooShort {
                len,
                min: MIN_PROSE_CHARS,
            });
        }

        let executive_summary = extract_summary(prose).ok_or(ReconstructionError::MissingSummary)?;

        let extracted = extract_options(prose);
        if extracted.len() < MIN_OPTIONS {
            return Err(ReconstructionError::TooFewOptions {
                found: extracted.len(),
                required: MIN_OPTIONS,
            });
        }

        // Only ids the retriever actually supplied may be cited.
        let known = |text: &str| -> Vec<String> {
            source_ids_in(text)
                .into_iter()
                .filter(|id| sources.iter().any(|s| &s.id == id))
                .collect()
        };
        let cited = known(prose);

        let options: Vec<ConsultOption> = extracted
            .into_iter()
            .take(crate::repair::OPTION_COUNT)
            .map(|o| ConsultOption {
                sources: known(&o.body),
                title: o.title,
                description: o.description,
                pros: o.pros,
                cons: o.cons,
            })
            .collect();

        let recommendation = extract_recommendation(prose);
        let option = recommendation
            .option
            .filter(|n| *n <= options.len())
            .unwrap_or(1);
        let mut recommended_action = RecommendedAction {
            option,
            steps: recommendation.steps,
            sources: known(&recommendation.body),
        };
        if recommended_action.steps.is_empty() {
            recommended_action.steps = default_action().steps;
        }

        let mut reflection_prompts = extract_questions(prose);
        for default in DEFAULT_REFLECTION_PROMPTS {
            if reflection_prompts.len() >= 2 {
                break;
            }
            reflection_prompts.push(default.to_string());
        }
        reflection_prompts.truncate(MAX_REFLECTION_PROMPTS);

        let source_refs: Vec<SourceRef> = cited
            .iter()
            .filter_map(|id| sources.iter().find(|s| &s.id == id))
            .map(RetrievedSource::to_source_ref)
            .collect();

        Ok(StructuredResult {
            title: extract_title(prose),
            executive_summary,
            options,
            recommended_action,
            reflection_prompts,
            sources: source_refs,
            confidence: reconstruction_confidence(prose, cited.len()),
            scholar_flag: true,
        })
    }
}

/// Confidence of a reconstruction from prose quality signals.
///
/// | Signal | Increment |
/// |--------|-----------|
/// | length ≥ 1500 chars | +0.05 |
/// | length ≥ 3000 chars | +0.05 |
/// | ≥ 4 paragraphs | +0.05 |
/// | ≥ 2 distinct cited sources | +0.05 |
/// | ≥ 4 distinct cited sources | +0.05 |
/// | ≥ 3 reasoning connectives | +0.05 |
pub fn reconstruction_confidence(prose: &str, distinct_sources: usize) -> f64 {
    let len = prose.chars().count();
    let signals = [
        len >= 1500,
        len >= 3000,
        paragraphs(prose).len() >= 4,
        distinct_sources >= 2,
        distinct_sources >= 4,
        connective_count(prose) >= 3,
    ];
    let hits = signals.iter().filter(|s| **s).count() as f64;
    (BASE_CONFIDENCE + INCREMENT * hits).min(MAX_CONFIDENCE)
}

/// Fixed result used when no prose can be reconstructed.
///
/// Cites the most relevant valid retrieved sources so the result stays
/// grounded.
pub fn generic_template(sources: &[RetrievedSource]) -> StructuredResult {
    let mut ranked: Vec<&RetrievedSource> = sources
        .iter()
        .filter(|s| crate::patterns::is_valid_source_id(&s.id) && !s.gloss.trim().is_empty())
        .collect();
    ranked.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
    let mut source_refs: Vec<SourceRef> = Vec::with_capacity(TEMPLATE_SOURCE_COUNT);
    for source in ranked {
        if source_refs.len() == TEMPLATE_SOURCE_COUNT {
            break;
        }
        if !source_refs.iter().any(|s| s.id == source.id) {
            source_refs.push(source.to_source_ref());
        }
    }

    let mut options = Vec::new();
    pad_options(&mut options, &source_refs, &mut Vec::new());

    let mut recommended_action = default_action();
    recommended_action.sources = source_refs.first().map(|s| s.id.clone()).into_iter().collect();

    StructuredResult {
        title: None,
        executive_summary: DEFAULT_SUMMARY.to_string(),
        options,
        recommended_action,
        reflection_prompts: DEFAULT_REFLECTION_PROMPTS.iter().map(|p| p.to_string()).collect(),
        sources: source_refs,
        confidence: TEMPLATE_CONFIDENCE,
        scholar_flag: true,
    }
}
