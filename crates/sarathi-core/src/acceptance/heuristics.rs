//! Stage A heuristics: length, spam, script, and dilemma markers.

use std::collections::HashSet;

use crate::patterns::{DECISION, PUNCTUATION_RUN, STAKEHOLDER, TENSION, UPPERCASE_RUN};

/// Minimum accepted length, in characters.
pub const MIN_CHARS: usize = 50;

/// Maximum accepted length, in characters.
pub const MAX_CHARS: usize = 5000;

const REPEATED_CHAR_RUN: usize = 10;
const DIVERSITY_MIN_WORDS: usize = 12;
const DIVERSITY_FLOOR: f64 = 0.30;

/// A matched spam signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpamSignature {
    RepeatedCharacter,
    UppercaseRun,
    PunctuationRun,
    LowWordDiversity,
}

impl SpamSignature {
    pub fn describe(&self) -> &'static str {
        match self {
            SpamSignature::RepeatedCharacter => "long run of a repeated character",
            SpamSignature::UppercaseRun => "long run of uppercase letters",
            SpamSignature::PunctuationRun => "long run of punctuation",
            SpamSignature::LowWordDiversity => "excessive word repetition",
        }
    }
}

/// Which dilemma markers were found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DilemmaMarkers {
    pub stakeholder: bool,
    pub tension: bool,
    pub decision: bool,
}

impl DilemmaMarkers {
    pub fn detect(text: &str) -> Self {
        Self {
            stakeholder: STAKEHOLDER.is_match(text),
            tension: TENSION.is_match(text),
            decision: DECISION.is_match(text),
        }
    }

    pub fn complete(&self) -> bool {
        self.stakeholder && self.tension && self.decision
    }

    /// Names of the missing marker classes.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.stakeholder {
            missing.push("stakeholder");
        }
        if !self.tension {
            missing.push("tension");
        }
        if !self.decision {
            missing.push("decision");
        }
        missing
    }
}

/// Length in characters (not bytes).
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// First spam signature matched, if any.
pub fn detect_spam(text: &str) -> Option<SpamSignature> {
    if longest_char_run(text) >= REPEATED_CHAR_RUN {
        return Some(SpamSignature::RepeatedCharacter);
    }
    if UPPERCASE_RUN.is_match(text) {
        return Some(SpamSignature::UppercaseRun);
    }
    if PUNCTUATION_RUN.is_match(text) {
        return Some(SpamSignature::PunctuationRun);
    }
    if word_diversity(text).is_some_and(|ratio| ratio < DIVERSITY_FLOOR) {
        return Some(SpamSignature::LowWordDiversity);
    }
    None
}

/// Longest run of one repeated non-whitespace character.
fn longest_char_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous: Option<char> = None;

    for c in text.chars() {
        if c.is_whitespace() {
            current = 0;
            previous = None;
            continue;
        }
        if previous == Some(c) {
            current += 1;
        } else {
            current = 1;
            previous = Some(c);
        }
        longest = longest.max(current);
    }
    longest
}

/// Unique/total word ratio, `None` below the minimum word count.
fn word_diversity(text: &str) -> Option<f64> {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();

    if words.len() < DIVERSITY_MIN_WORDS {
        return None;
    }
    let unique: HashSet<&str> = words.iter().map(String::as_str).collect();
    Some(unique.len() as f64 / words.len() as f64)
}

/// Whether a character belongs to the Latin script ranges we handle in English.
///
/// Covers ASCII, Latin-1 and Latin Extended-A/B, the Latin Extended
/// Additional block (IAST diacritics such as ṛ, ṣ, ḥ), and typographic
/// punctuation such as curly quotes and dashes.
fn is_latin_char(c: char) -> bool {
    matches!(c as u32,
        0x0000..=0x007F
        | 0x00A0..=0x024F
        | 0x1E00..=0x1EFF
        | 0x2000..=0x206F)
}

/// Whether the text contains characters outside the Latin ranges.
pub fn is_non_latin(text: &str) -> bool {
    text.chars().any(|c| !is_latin_char(c))
}
