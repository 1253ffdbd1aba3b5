//! Cases, sources, prose, and structured candidates for tests.

use serde_json::{json, Value as JsonValue};

use sarathi_core::RetrievedSource;

use crate::orchestrator::CaseRequest;

pub(crate) fn sources() -> Vec<RetrievedSource> {
    vec![
        RetrievedSource::new("BG_2_47", "Act without attachment to the fruits of action", 0.92),
        RetrievedSource::new("BG_3_35", "Better one's own duty, though imperfect", 0.85),
        RetrievedSource::new("BG_18_63", "Reflect fully, then do as you choose", 0.74),
        RetrievedSource::new("BG_2_31", "Do not waver from your rightful duty", 0.61),
    ]
}

pub(crate) fn workplace_case() -> CaseRequest {
    CaseRequest::new(
        "case-workplace",
        "Asked to alter audit figures",
        "My manager asked me to quietly change the numbers in a quarterly report before the \
         audit. My team depends on this bonus, but I worry that customers and investors will be \
         misled if I go along. I also fear losing my job if I refuse. Should I refuse and risk \
         my position, or go along with it this one time?",
        sources(),
    )
}

pub(crate) fn factual_case() -> CaseRequest {
    CaseRequest::new(
        "case-factual",
        "Quick geography question",
        "What is the capital of France?",
        sources(),
    )
}

pub(crate) const DRAFT_PROSE: &str = "# Duty and Loyalty at Work\n\n\
    You are weighing loyalty to your manager and team against honesty toward customers and \
    investors who trust the reports. Both obligations are real, but they do not carry equal \
    weight when the act in question is falsifying audited numbers.\n\n\
    ### Option 1: Refuse the change\n\
    Decline and explain that you cannot alter audited figures (BG_2_47).\n\
    Pros: integrity\n\
    Cons: strained relationship\n\n\
    ### Option 2: Report the request\n\
    Take the request to compliance, since that is its purpose (BG_3_35).\n\
    Pros: protects others\n\
    Cons: personal risk\n\n\
    ### Option 3: Ask for time\n\
    Request the instruction in writing and reflect before acting (BG_18_63).\n\
    Pros: clarity\n\
    Cons: delay\n\n\
    ## Recommendation\n\
    Option 1.\n\
    1. Speak with your manager privately\n\
    2. State what you can and cannot do\n\n\
    What would you want the investors to know?";

pub(crate) const CRITIQUE_TEXT: &str = "The draft omits the team's perspective in Option 2 and \
    does not explain why BG_3_35 applies. The recommendation needs clearer steps.";

pub(crate) const REFINED_PROSE: &str = "# Honesty Under Pressure\n\n\
    You are caught between loyalty to a manager who controls your future and a duty of honesty \
    toward the customers and investors who rely on accurate reports. The pressure is real, \
    because your team's bonus depends on the numbers, yet altering them would betray people \
    who cannot see what happens inside the company.\n\n\
    The Gita's teaching on duty (BG_3_35) suggests that acting on your own obligations, even \
    imperfectly, matters more than doing what others expect of you. Therefore the question is \
    less about consequences and more about which duty is truly yours.\n\n\
    ### Option 1: Refuse and explain\n\
    Decline to change the figures and explain your reasons calmly to your manager, citing BG_2_47.\n\
    Pros: integrity; clear conscience\n\
    Cons: possible retaliation\n\n\
    ### Option 2: Escalate through proper channels\n\
    Raise the request with compliance or the audit committee, since they exist for exactly this.\n\
    Pros: protects the wider organisation\n\
    Cons: damages trust with your manager\n\n\
    ### Option 3: Delay and gather facts\n\
    Ask for the request in writing and take time to understand it. See BG_18_63.\n\
    Pros: buys time\n\
    Cons: may only postpone the conflict\n\n\
    ## Recommendation\n\
    I recommend Option 1 because it honours your duty without abandoning your team.\n\
    - Ask for a private conversation with your manager\n\
    - Explain that you cannot alter audited figures\n\n\
    What do you owe the people who trust those reports? \
    Who in your life would you want to explain this decision to?";

/// A complete, schema-valid structure response that needs no repair.
pub(crate) fn structured_json() -> JsonValue {
    json!({
        "title": "Honesty Under Pressure",
        "executive_summary": "You are torn between loyalty to your manager and honesty toward \
            the people who rely on accurate reports.",
        "options": [
            {
                "title": "Refuse and explain",
                "description": "Decline to change the figures and explain why.",
                "pros": ["Integrity"],
                "cons": ["Possible retaliation"],
                "sources": ["BG_2_47"]
            },
            {
                "title": "Escalate through proper channels",
                "description": "Raise the request with compliance.",
                "pros": ["Protects others"],
                "cons": ["Strains trust"],
                "sources": ["BG_3_35"]
            },
            {
                "title": "Delay and gather facts",
                "description": "Ask for the request in writing first.",
                "pros": ["Buys time"],
                "cons": ["Postpones the conflict"],
                "sources": ["BG_18_63"]
            }
        ],
        "recommended_action": {
            "option": 1,
            "steps": ["Ask for a private conversation", "Explain what you cannot do"],
            "sources": ["BG_2_47"]
        },
        "reflection_prompts": [
            "What do you owe the people who trust those reports?",
            "Who would you want to explain this decision to?"
        ],
        "sources": [
            { "id": "BG_2_47", "gloss": "Act without attachment to the fruits of action", "relevance": 0.92 },
            { "id": "BG_3_35", "gloss": "Better one's own duty, though imperfect", "relevance": 0.85 },
            { "id": "BG_18_63", "gloss": "Reflect fully, then do as you choose", "relevance": 0.74 }
        ],
        "confidence": 0.85,
        "scholar_flag": false
    })
}

/// Structure response with no options at all.
pub(crate) fn missing_options_json() -> JsonValue {
    let mut value = structured_json();
    value["options"] = json!([]);
    value
}

/// Complete except for reflection prompts, at middling confidence.
///
/// Repair defaults the prompts (one IMPORTANT penalty), which lands the
/// result under the post-repair threshold.
pub(crate) fn low_confidence_json() -> JsonValue {
    let mut value = structured_json();
    if let Some(obj) = value.as_object_mut() {
        obj.remove("reflection_prompts");
    }
    value["confidence"] = json!(0.55);
    value
}
