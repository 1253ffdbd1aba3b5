//! Prompts for each pipeline stage.
//!
//! Every prompt family shares one [`PROMPT_VERSION`]; it is stamped on each
//! audit row so output drift across prompt changes can be traced offline.
//!
//! The shared [`BASE_SYSTEM_PROMPT`] frames the backend as a counselor who
//! lays out options, not as an authority issuing verdicts.

use sarathi_core::{AcceptanceCategory, RetrievedSource};

use crate::orchestrator::CaseRequest;

pub const PROMPT_VERSION: &str = "2025-11-01.1";

/// Substituted when the critique stage produces nothing.
pub const CRITIQUE_PLACEHOLDER: &str =
    "No critique available. Review the draft yourself for missing perspectives, unsupported \
     claims, and citations that do not match the supplied sources.";

/// Shared system prompt for prose stages.
pub const BASE_SYSTEM_PROMPT: &str = r#"
You are Sarathi, a counselor helping a person think through an ethical dilemma.

You do not decide for them. You lay out realistic paths, weigh their costs
honestly, and ground your reasoning in the source excerpts you are given.

## Counsel Constraints
1. Cite sources only by the ids you were given (for example BG_2_47)
2. Never invent a source id or quote
3. Present exactly three distinct options
4. Name the people affected by each option
5. Acknowledge uncertainty instead of hiding it

## Critical Reminder
The person owns the decision. You help them see it clearly.
"#;

/// System prompt for the Stage B acceptance classifier.
pub const CLASSIFIER_SYSTEM_PROMPT: &str = r#"
You classify submissions to an ethical-dilemma counseling service.

Respond with JSON only: {"category": "<label>", "reason": "<one sentence>"}

Labels:
- accepted: a real situation with competing obligations and a decision to make
- not_dilemma: a factual question, request for trivia, or no decision involved
- unethical_core: the goal itself is to wrong someone (deceive, steal, retaliate)
- too_vague: a dilemma may exist but the situation is not described
- harmful_intent: intent to harm self or others
- format_error: not readable prose
"#;

/// System prompt for the rejection explanation.
pub const EXPLANATION_SYSTEM_PROMPT: &str = r#"
You write short, warm notes explaining why a counseling service cannot take
a submission as written. Two or three sentences. No lecturing. Suggest what
the person could share instead. Never repeat harmful details back.
"#;

/// System prompt for the structure stage.
pub const STRUCTURE_SYSTEM_PROMPT: &str = r#"
You convert counseling prose into a JSON document. Preserve the prose's
reasoning and citations. Do not add options, steps, or sources that the
prose does not contain. Output JSON only.
"#;

pub fn classification_prompt(text: &str) -> String {
    format!("Classify this submission.\n\n<submission>\n{text}\n</submission>")
}

pub fn explanation_prompt(category: AcceptanceCategory, reason: &str) -> String {
    format!(
        "The submission was classified as '{category}' because: {reason}\n\n\
         Write the note to the person who submitted it."
    )
}

pub fn draft_prompt(case: &CaseRequest) -> String {
    format!(
        "{}\n\n## Sources\n{}\n\n## Task\n\
         Write a thorough first draft of counsel. Open with a short title as a markdown header \
         and a summary paragraph. Then give three options, each under a heading \
         \"### Option N: <title>\" with a description and Pros:/Cons: lists citing source ids. \
         Close with a \"## Recommendation\" naming one option with numbered steps, and two or \
         three reflection questions for the person.",
        case_block(case),
        sources_block(&case.sources)
    )
}

pub fn critique_prompt(case: &CaseRequest, draft: &str) -> String {
    format!(
        "{}\n\n## Draft\n{draft}\n\n## Task\n\
         Critique the draft. List missing stakeholders, weak or unsupported reasoning, options \
         that are not truly distinct, and any citation that does not appear in the sources \
         below.\n\n## Sources\n{}",
        case_block(case),
        sources_block(&case.sources)
    )
}

pub fn refine_prompt(case: &CaseRequest, draft: &str, critique: &str) -> String {
    format!(
        "{}\n\n## Draft\n{draft}\n\n## Critique\n{critique}\n\n## Task\n\
         Rewrite the draft, addressing the critique. Keep the same structure: title header, \
         summary, three \"### Option N:\" sections with Pros:/Cons:, a \"## Recommendation\" \
         with numbered steps, and reflection questions.\n\n## Sources\n{}",
        case_block(case),
        sources_block(&case.sources)
    )
}

/// Structure prompt for a full-capability backend.
pub fn structure_prompt(case: &CaseRequest, prose: &str) -> String {
    format!(
        "{}\n\n## Counsel\n{prose}\n\n## Task\n\
         Convert the counsel into the JSON document described by the schema. Fields:\n\
         - executive_summary: the summary paragraph\n\
         - options: exactly three, each with title, description, pros, cons, sources (ids)\n\
         - recommended_action: option (1-based), steps, sources\n\
         - reflection_prompts: two or three questions\n\
         - sources: each cited source as {{id, gloss, relevance}}\n\
         - confidence: 0.0-1.0, how well the counsel is grounded in the sources\n\
         - scholar_flag: true if a human expert should review\n\n## Sources\n{}",
        case_block(case),
        sources_block(&case.sources)
    )
}

/// Shorter structure prompt for resource-constrained backends.
pub fn simplified_structure_prompt(case: &CaseRequest, prose: &str) -> String {
    let ids: Vec<&str> = case.sources.iter().map(|s| s.id.as_str()).collect();
    format!(
        "Dilemma: {}\n\nCounsel:\n{prose}\n\n\
         Return JSON with: executive_summary, options (3 items: title, description, pros, cons, \
         sources), recommended_action (option, steps, sources), reflection_prompts (2-3), \
         sources (id, gloss, relevance), confidence, scholar_flag. Allowed source ids: {}.",
        case.title,
        ids.join(", ")
    )
}

fn case_block(case: &CaseRequest) -> String {
    format!("## Dilemma: {}\n\n{}", case.title, case.description)
}

fn sources_block(sources: &[RetrievedSource]) -> String {
    if sources.is_empty() {
        return "(no sources retrieved)".to_string();
    }
    sources
        .iter()
        .map(|s| match &s.text {
            Some(text) => format!("- {}: {}\n  {}", s.id, s.gloss, text),
            None => format!("- {}: {}", s.id, s.gloss),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
