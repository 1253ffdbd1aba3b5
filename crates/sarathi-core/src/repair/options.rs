//! Option and recommended-action normalization.

use serde_json::Value as JsonValue;

use super::sources::kind_of;
use super::{Repair, RepairAction, OPTION_COUNT};
use crate::types::{ConsultOption, Field, RecommendedAction, SourceRef};

/// Generic options used to fill a short option list.
const GENERIC_OPTIONS: [(&str, &str); 3] = [
    (
        "Seek counsel before acting",
        "Pause and talk the situation through with a mentor or someone you trust before \
         committing, so the decision is made with a clear head rather than under pressure.",
    ),
    (
        "Act on the duty you cannot set aside",
        "Identify the responsibility that matters most in this situation and act on it, \
         accepting the personal cost without clinging to a particular outcome.",
    ),
    (
        "Pursue a measured middle path",
        "Look for a course that honours the most important obligations on each side, \
         openly acknowledging what is being traded off and why.",
    ),
];

const DEFAULT_STEPS: [&str; 2] = [
    "Write down the obligations on each side and which people each choice affects.",
    "Discuss the option you are leaning towards with someone you trust before acting.",
];

/// Normalize a list of strings, dropping non-string and blank entries.
///
/// Returns the list and whether anything had to be coerced.
pub(super) fn string_list(value: Option<&JsonValue>) -> (Vec<String>, bool) {
    match value {
        None | Some(JsonValue::Null) => (Vec::new(), false),
        Some(JsonValue::Array(items)) => {
            let kept: Vec<String> = items
                .iter()
                .filter_map(JsonValue::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            let coerced = kept.len() != items.len();
            (kept, coerced)
        }
        Some(_) => (Vec::new(), true),
    }
}

fn non_empty_str(value: Option<&JsonValue>) -> Option<String> {
    value
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Normalize one option entry. `None` means the entry was unusable.
fn normalize_option(
    entry: &JsonValue,
    position: usize,
    repairs: &mut Vec<Repair>,
) -> Option<ConsultOption> {
    if let Some(text) = entry.as_str().map(str::trim).filter(|s| !s.is_empty()) {
        repairs.push(Repair::new(
            Field::Options,
            RepairAction::Coerced,
            format!("option {position} was a bare string"),
        ));
        return Some(ConsultOption {
            title: text.to_string(),
            description: text.to_string(),
            pros: Vec::new(),
            cons: Vec::new(),
            sources: Vec::new(),
        });
    }

    let obj = entry.as_object()?;

    let title = non_empty_str(obj.get("title")).unwrap_or_else(|| {
        repairs.push(Repair::new(
            Field::Options,
            RepairAction::Defaulted,
            format!("option {position} had no title"),
        ));
        format!("Option {position}")
    });

    let description = non_empty_str(obj.get("description")).unwrap_or_else(|| {
        repairs.push(Repair::new(
            Field::Options,
            RepairAction::Defaulted,
            format!("option {position} had no description"),
        ));
        title.clone()
    });

    let mut lists = [Vec::new(), Vec::new(), Vec::new()];
    for (slot, key) in lists.iter_mut().zip(["pros", "cons", "sources"]) {
        let (items, coerced) = string_list(obj.get(key));
        if coerced {
            repairs.push(Repair::new(
                Field::Options,
                RepairAction::Coerced,
                format!("option {position} {key} was not a list of strings"),
            ));
        }
        *slot = items;
    }
    let [pros, cons, sources] = lists;

    Some(ConsultOption {
        title,
        description,
        pros,
        cons,
        sources,
    })
}

/// Normalize the option list, trimming extras. Padding happens later,
/// once the final source list is known.
pub(super) fn normalize_options(
    candidate: Option<&JsonValue>,
    repairs: &mut Vec<Repair>,
) -> Vec<ConsultOption> {
    let entries: &[JsonValue] = match candidate {
        Some(JsonValue::Array(entries)) => entries.as_slice(),
        Some(other) => {
            repairs.push(Repair::new(
                Field::Options,
                RepairAction::Coerced,
                format!("options was {}, not a list", kind_of(other)),
            ));
            &[]
        }
        None => {
            repairs.push(Repair::new(
                Field::Options,
                RepairAction::Defaulted,
                "options missing",
            ));
            &[]
        }
    };

    let mut options = Vec::with_capacity(OPTION_COUNT);
    for (i, entry) in entries.iter().enumerate() {
        match normalize_option(entry, i + 1, repairs) {
            Some(option) => options.push(option),
            None => repairs.push(Repair::new(
                Field::Options,
                RepairAction::Dropped,
                format!("option {} was {}", i + 1, kind_of(entry)),
            )),
        }
    }

    if options.len() > OPTION_COUNT {
        repairs.push(Repair::new(
            Field::Options,
            RepairAction::Trimmed,
            format!("{} options trimmed to {}", options.len(), OPTION_COUNT),
        ));
        options.truncate(OPTION_COUNT);
    }
    options
}

/// Pad the option list to exactly three with generic, source-grounded options.
pub(crate) fn pad_options(
    options: &mut Vec<ConsultOption>,
    sources: &[SourceRef],
    repairs: &mut Vec<Repair>,
) {
    let unused: Vec<(&str, &str)> = GENERIC_OPTIONS
        .iter()
        .filter(|(title, _)| !options.iter().any(|o| o.title == *title))
        .copied()
        .collect();
    let mut generic = unused.into_iter();
    let mut cite = sources.iter().cycle();

    while options.len() < OPTION_COUNT {
        let Some((title, description)) = generic.next() else {
            break;
        };
        let citation: Vec<String> = cite.next().map(|s| vec![s.id.clone()]).unwrap_or_default();
        repairs.push(Repair::new(
            Field::Options,
            RepairAction::Synthesized,
            format!("added generic option '{title}'"),
        ));
        options.push(ConsultOption {
            title: title.to_string(),
            description: description.to_string(),
            pros: vec!["Keeps the decision grounded and deliberate".to_string()],
            cons: vec!["Does not resolve the specifics of your situation on its own".to_string()],
            sources: citation,
        });
    }
}

/// Normalize the recommended action.
pub(super) fn normalize_action(
    candidate: Option<&JsonValue>,
    repairs: &mut Vec<Repair>,
) -> RecommendedAction {
    let Some(obj) = candidate.and_then(JsonValue::as_object) else {
        let action = match candidate {
            None => RepairAction::Defaulted,
            Some(_) => RepairAction::Coerced,
        };
        repairs.push(Repair::new(
            Field::RecommendedAction,
            action,
            "recommended action missing or not an object",
        ));
        return default_action();
    };

    let option = match obj.get("option") {
        Some(JsonValue::Number(n)) => n.as_u64(),
        Some(JsonValue::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .filter(|n| (1..=OPTION_COUNT as u64).contains(n))
    .map(|n| n as usize)
    .unwrap_or_else(|| {
        repairs.push(Repair::new(
            Field::RecommendedAction,
            RepairAction::Coerced,
            "recommended option index missing or out of range",
        ));
        1
    });

    let (mut steps, coerced) = string_list(obj.get("steps"));
    if coerced || steps.is_empty() {
        repairs.push(Repair::new(
            Field::RecommendedAction,
            RepairAction::Defaulted,
            "recommended action had no usable steps",
        ));
    }
    if steps.is_empty() {
        steps = DEFAULT_STEPS.iter().map(|s| s.to_string()).collect();
    }

    let (sources, coerced) = string_list(obj.get("sources"));
    if coerced {
        repairs.push(Repair::new(
            Field::RecommendedAction,
            RepairAction::Coerced,
            "recommended action sources was not a list of strings",
        ));
    }

    RecommendedAction {
        option,
        steps,
        sources,
    }
}

pub(crate) fn default_action() -> RecommendedAction {
    RecommendedAction {
        option: 1,
        steps: DEFAULT_STEPS.iter().map(|s| s.to_string()).collect(),
        sources: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrong_types_become_empty_lists() {
        let mut repairs = Vec::new();
        let options = normalize_options(
            Some(&json!([{ "title": "A", "description": "B", "pros": "not a list", "cons": [1, "risk"] }])),
            &mut repairs,
        );
        assert_eq!(options[0].pros, Vec::<String>::new());
        assert_eq!(options[0].cons, vec!["risk"]);
        assert_eq!(repairs.len(), 2);
    }

    #[test]
    fn test_extras_trimmed() {
        let mut repairs = Vec::new();
        let option = json!({ "title": "A", "description": "B", "pros": [], "cons": [], "sources": [] });
        let options = normalize_options(
            Some(&json!([option.clone(), option.clone(), option.clone(), option])),
            &mut repairs,
        );
        assert_eq!(options.len(), 3);
        assert_eq!(repairs[0].action, RepairAction::Trimmed);
    }

    #[test]
    fn test_padding_cites_sources() {
        let mut repairs = Vec::new();
        let mut options = Vec::new();
        let sources = vec![SourceRef {
            id: "BG_2_47".to_string(),
            gloss: "Duty".to_string(),
            relevance: 0.8,
        }];
        pad_options(&mut options, &sources, &mut repairs);
        assert_eq!(options.len(), 3);
        assert!(options.iter().all(|o| o.sources == vec!["BG_2_47"]));
        assert_eq!(repairs.len(), 3);
    }

    #[test]
    fn test_action_index_out_of_range() {
        let mut repairs = Vec::new();
        let action = normalize_action(
            Some(&json!({ "option": 7, "steps": ["Do it"], "sources": [] })),
            &mut repairs,
        );
        assert_eq!(action.option, 1);
        assert_eq!(action.steps, vec!["Do it"]);
        assert_eq!(repairs.len(), 1);
    }

    #[test]
    fn test_action_string_index_accepted() {
        let mut repairs = Vec::new();
        let action = normalize_action(
            Some(&json!({ "option": "2", "steps": ["Do it"], "sources": [] })),
            &mut repairs,
        );
        assert_eq!(action.option, 2);
        assert!(repairs.is_empty());
    }
}
