//! Source-list validation, citation integrity, and citation injection.

use serde_json::Value as JsonValue;

use super::{Repair, RepairAction};
use crate::patterns::is_valid_source_id;
use crate::types::{Field, RetrievedSource, SourceRef};

/// Why a source entry was dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRejection {
    NotAnObject,
    InvalidId(String),
    EmptyGloss(String),
    RelevanceOutOfRange { id: String, relevance: Option<f64> },
    Duplicate(String),
}

impl SourceRejection {
    fn describe(&self) -> String {
        match self {
            SourceRejection::NotAnObject => "source entry is not an object".to_string(),
            SourceRejection::InvalidId(id) => format!("source id '{id}' has invalid format"),
            SourceRejection::EmptyGloss(id) => format!("source '{id}' has an empty gloss"),
            SourceRejection::RelevanceOutOfRange { id, relevance } => match relevance {
                Some(r) => format!("source '{id}' relevance {r} outside [0, 1]"),
                None => format!("source '{id}' has no numeric relevance"),
            },
            SourceRejection::Duplicate(id) => format!("duplicate source '{id}'"),
        }
    }
}

/// Validate one source entry.
///
/// A bare id string that names a retrieved source is promoted to that
/// source's full entry.
fn validate_entry(
    entry: &JsonValue,
    retrieved: &[RetrievedSource],
) -> Result<(SourceRef, bool), SourceRejection> {
    if let Some(id) = entry.as_str() {
        let id = id.trim();
        return retrieved
            .iter()
            .find(|s| s.id == id && is_valid_source_id(&s.id) && !s.gloss.trim().is_empty())
            .map(|s| (s.to_source_ref(), true))
            .ok_or_else(|| SourceRejection::InvalidId(id.to_string()));
    }

    let obj = entry.as_object().ok_or(SourceRejection::NotAnObject)?;

    let id = obj
        .get("id")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if !is_valid_source_id(id) {
        return Err(SourceRejection::InvalidId(id.to_string()));
    }

    let gloss = obj
        .get("gloss")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if gloss.is_empty() {
        return Err(SourceRejection::EmptyGloss(id.to_string()));
    }

    let relevance = obj.get("relevance").and_then(JsonValue::as_f64);
    match relevance {
        Some(r) if (0.0..=1.0).contains(&r) => Ok((
            SourceRef {
                id: id.to_string(),
                gloss: gloss.to_string(),
                relevance: r,
            },
            false,
        )),
        _ => Err(SourceRejection::RelevanceOutOfRange {
            id: id.to_string(),
            relevance,
        }),
    }
}

/// Validate the candidate source list, dropping invalid and duplicate entries.
pub(super) fn validate_sources(
    candidate: Option<&JsonValue>,
    retrieved: &[RetrievedSource],
    repairs: &mut Vec<Repair>,
) -> Vec<SourceRef> {
    let entries = match candidate {
        Some(JsonValue::Array(entries)) => entries.as_slice(),
        Some(other) => {
            repairs.push(Repair::new(
                Field::Sources,
                RepairAction::Coerced,
                format!("sources was {}, not a list", kind_of(other)),
            ));
            return Vec::new();
        }
        None => {
            repairs.push(Repair::new(
                Field::Sources,
                RepairAction::Defaulted,
                "sources missing",
            ));
            return Vec::new();
        }
    };

    let mut sources: Vec<SourceRef> = Vec::with_capacity(entries.len());
    for entry in entries {
        let checked = validate_entry(entry, retrieved).and_then(|(source, promoted)| {
            if sources.iter().any(|s| s.id == source.id) {
                Err(SourceRejection::Duplicate(source.id))
            } else {
                Ok((source, promoted))
            }
        });

        match checked {
            Ok((source, promoted)) => {
                if promoted {
                    repairs.push(Repair::new(
                        Field::Sources,
                        RepairAction::Coerced,
                        format!("bare id '{}' expanded from retrieved source", source.id),
                    ));
                }
                sources.push(source);
            }
            Err(rejection) => {
                repairs.push(Repair::new(
                    Field::Sources,
                    RepairAction::Dropped,
                    rejection.describe(),
                ));
            }
        }
    }
    sources
}

/// Remove citations that do not resolve to the source list.
///
/// Also removes duplicate citations, keeping first occurrence.
pub(super) fn strip_unresolved(
    citations: &mut Vec<String>,
    sources: &[SourceRef],
    owner: &str,
    repairs: &mut Vec<Repair>,
) {
    let mut kept: Vec<String> = Vec::with_capacity(citations.len());
    for id in citations.drain(..) {
        if kept.contains(&id) {
            continue;
        }
        if sources.iter().any(|s| s.id == id) {
            kept.push(id);
        } else {
            repairs.push(Repair::new(
                Field::Sources,
                RepairAction::Stripped,
                format!("{owner} cited unknown source '{id}'"),
            ));
        }
    }
    *citations = kept;
}

/// Retrieved sources not yet in `sources`, in injection order.
///
/// Highest relevance first; ties keep retrieval order.
pub(super) fn injection_candidates<'a>(
    retrieved: &'a [RetrievedSource],
    sources: &[SourceRef],
) -> Vec<&'a RetrievedSource> {
    let mut candidates: Vec<&RetrievedSource> = Vec::new();
    for source in retrieved {
        let usable = is_valid_source_id(&source.id) && !source.gloss.trim().is_empty();
        let present = sources.iter().any(|s| s.id == source.id)
            || candidates.iter().any(|c| c.id == source.id);
        if usable && !present {
            candidates.push(source);
        }
    }
    // Stable sort: ties keep retrieval order.
    candidates.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
    candidates
}

pub(super) fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "an object",
    }
}
