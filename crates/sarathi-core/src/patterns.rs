//! Shared detection patterns.
//!
//! Source-id and prose patterns used by the acceptance gate, the
//! reconstructor, and the repair cascade.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // =========================================================================
    // SOURCE IDS
    // =========================================================================

    /// Canonical source id, anchored (e.g. "BG_2_47")
    pub static ref SOURCE_ID: Regex = Regex::new(
        r"^[A-Z]{2,5}_\d{1,3}_\d{1,3}$"
    ).unwrap();

    /// Source id anywhere in prose
    pub static ref SOURCE_ID_IN_TEXT: Regex = Regex::new(
        r"\b[A-Z]{2,5}_\d{1,3}_\d{1,3}\b"
    ).unwrap();

    // =========================================================================
    // DILEMMA MARKERS
    // =========================================================================

    /// References to people affected by the decision
    pub static ref STAKEHOLDER: Regex = Regex::new(
        r"(?i)\b(boss|manager|supervisor|colleagues?|co-?workers?|team(mates?)?|friends?|family|partner|spouse|wife|husband|parents?|mother|father|mom|dad|sons?|daughters?|child(ren)?|kids?|brother|sister|siblings?|clients?|customers?|employer|employees?|company|organi[sz]ation|community|neighbou?rs?|students?|patients?|stakeholders?|shareholders?|investors?|people|others|everyone|someone)\b"
    ).unwrap();

    /// Conflict, uncertainty, or competing obligations
    pub static ref TENSION: Regex = Regex::new(
        r"(?i)\b(but|however|although|though|yet|torn|conflict(ed|ing)?|dilemma|struggl(e|ing)|unsure|uncertain|hesitant|worried|worry|afraid|fear|guilt(y)?|pressured?|tension|on the other hand|at the same time|risks?|risking|consequences?|loyal(ty)?|betray(al|ing)?|compromise|sacrifice|dishonest|unfair)\b"
    ).unwrap();

    /// Decision-seeking language
    pub static ref DECISION: Regex = Regex::new(
        r"(?i)(\bshould (i|we)\b|\bwhat (should|do|would) (i|we)\b|\bwhether (to|i|we)\b|\bhow (do|should|can) (i|we)\b|\bdecid(e|ing|ed)\b|\bdecision\b|\bchoos(e|ing)\b|\bchoice\b|\bis it (right|wrong|ethical|okay|ok|fair)\b|\bright thing\b)"
    ).unwrap();

    // =========================================================================
    // SPAM SIGNATURES
    // =========================================================================

    /// Long run of consecutive uppercase letters
    pub static ref UPPERCASE_RUN: Regex = Regex::new(r"[A-Z]{20,}").unwrap();

    /// Long run of consecutive punctuation
    pub static ref PUNCTUATION_RUN: Regex = Regex::new(r"[[:punct:]]{8,}").unwrap();

    // =========================================================================
    // PROSE STRUCTURE
    // =========================================================================

    /// Reasoning connectives that indicate argued, not listed, prose
    pub static ref CONNECTIVE: Regex = Regex::new(
        r"(?i)\b(because|therefore|thus|hence|consequently|since|however|whereas|so that|as a result)\b"
    ).unwrap();
}

/// Whether `id` has the canonical source-id shape.
pub fn is_valid_source_id(id: &str) -> bool {
    SOURCE_ID.is_match(id)
}

/// Source ids referenced in prose, in first-appearance order, deduplicated.
pub fn source_ids_in(text: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for m in SOURCE_ID_IN_TEXT.find_iter(text) {
        if !ids.iter().any(|id| id == m.as_str()) {
            ids.push(m.as_str().to_string());
        }
    }
    ids
}

/// Count of reasoning connectives in prose.
pub fn connective_count(text: &str) -> usize {
    CONNECTIVE.find_iter(text).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_shape() {
        assert!(is_valid_source_id("BG_2_47"));
        assert!(is_valid_source_id("MBH_12_110"));
        assert!(!is_valid_source_id("bg_2_47"));
        assert!(!is_valid_source_id("BG-2-47"));
        assert!(!is_valid_source_id("BG_2_47 "));
    }

    #[test]
    fn test_source_ids_in_prose_are_deduplicated() {
        let ids = source_ids_in("See BG_2_47 and BG_3_35; BG_2_47 again.");
        assert_eq!(ids, vec!["BG_2_47", "BG_3_35"]);
    }

    #[test]
    fn test_dilemma_markers() {
        assert!(STAKEHOLDER.is_match("my manager asked me"));
        assert!(TENSION.is_match("but I feel torn"));
        assert!(DECISION.is_match("Should I tell them?"));
        assert!(!DECISION.is_match("What is the capital of France?"));
    }

    #[test]
    fn test_connectives() {
        assert_eq!(connective_count("I stayed because it mattered; therefore I spoke."), 2);
    }
}
