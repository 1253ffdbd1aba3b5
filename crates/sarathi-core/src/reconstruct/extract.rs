//! Prose extraction primitives for the reconstructor.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref HEADER: Regex = Regex::new(r"^#{1,6}\s+(.+?)\s*#*$").unwrap();

    static ref BOLD_LEAD: Regex = Regex::new(r"^\*\*([^*]{3,100})\*\*").unwrap();

    /// "Option 2: Title", "### Option B - Title", "**Option 1.** Title"
    static ref OPTION_HEADING: Regex = Regex::new(
        r"(?i)^(?:#{1,6}\s*)?(?:\*\*)?option\s+([1-9a-c])\b\s*(?:\*\*)?\s*[:.)\-–]?\s*(?:\*\*)?\s*(.*)$"
    ).unwrap();

    /// "1. Title", "2) **Title**: description"
    static ref NUMBERED: Regex = Regex::new(r"^(?:#{1,6}\s*)?([1-9])[.)]\s+(.+)$").unwrap();

    static ref BULLET: Regex = Regex::new(r"^(?:[-*•]|\d+[.)])\s+(.+)$").unwrap();

    static ref PROS_LABEL: Regex = Regex::new(
        r"(?i)^(?:[-*•]\s*)?(?:\*\*)?(?:pros?|benefits?|advantages?|strengths?)(?:\*\*)?\s*:(?:\*\*)?\s*(.*)$"
    ).unwrap();

    static ref CONS_LABEL: Regex = Regex::new(
        r"(?i)^(?:[-*•]\s*)?(?:\*\*)?(?:cons?|risks?|drawbacks?|disadvantages?|costs?)(?:\*\*)?\s*:(?:\*\*)?\s*(.*)$"
    ).unwrap();

    // Markdown heading, bold lead, or a short "Recommendation:" label
    static ref RECOMMENDATION_HEADING: Regex = Regex::new(
        r"(?i)^(?:#{1,6}\s*(?:\*\*)?recommend(?:ed|ation)?\b|\*\*recommend(?:ed|ation)?\b|recommend(?:ed|ation)?\b[^.:]{0,40}:)"
    ).unwrap();

    static ref RECOMMENDATION_WORD: Regex = Regex::new(r"(?i)^recommend(?:ed|ation)?\b").unwrap();

    static ref RECOMMENDED_OPTION: Regex = Regex::new(
        r"(?i)recommend\w*[^.\n]{0,80}?option\s+([1-3a-c])\b"
    ).unwrap();

    static ref QUESTION: Regex = Regex::new(r"[^.!?\n]*\?").unwrap();

    /// Questions addressed to the reader about the response itself
    static ref META_QUESTION: Regex = Regex::new(
        r"(?i)\b(would you like|do you want|shall i|can i help|any (other|further) questions|let me know|does this help|anything else|is there more)\b"
    ).unwrap();
}

const SUMMARY_MAX_WORDS: usize = 200;
const SUMMARY_MAX_PARAGRAPHS: usize = 3;
const TITLE_MAX_CHARS: usize = 80;
const MIN_QUESTION_CHARS: usize = 15;

/// Options extracted from one prose block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractedOption {
    pub title: String,
    pub description: String,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
    /// Everything in the block, used for citation lookup
    pub body: String,
}

/// Recommendation section, if the prose has one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractedRecommendation {
    pub option: Option<usize>,
    pub steps: Vec<String>,
    pub body: String,
}

/// Blank-line separated, non-empty paragraphs.
pub fn paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .flat_map(|p| p.split("\r\n\r\n"))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn clean_inline(text: &str) -> String {
    text.replace("**", "").replace('`', "").trim().to_string()
}

fn is_option_heading(line: &str) -> bool {
    OPTION_HEADING.is_match(line)
}

fn is_structural(line: &str) -> bool {
    BULLET.is_match(line)
        || is_option_heading(line)
        || RECOMMENDATION_HEADING.is_match(line)
        || PROS_LABEL.is_match(line)
        || CONS_LABEL.is_match(line)
}

/// Title from a markdown header, a bold lead-in, or a short first sentence.
pub fn extract_title(text: &str) -> Option<String> {
    for line in text.lines().map(str::trim) {
        if let Some(caps) = HEADER.captures(line) {
            let title = clean_inline(&caps[1]);
            if !title.is_empty()
                && !is_option_heading(&title)
                && !RECOMMENDATION_WORD.is_match(&title)
            {
                return Some(title);
            }
        }
    }

    let first = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    if let Some(caps) = BOLD_LEAD.captures(first) {
        return Some(clean_inline(&caps[1]));
    }

    let sentence = first
        .split_inclusive(['.', '!', '?'])
        .next()
        .map(|s| s.trim_end_matches(['.', '!']).trim())?;
    if !sentence.is_empty() && sentence.chars().count() <= TITLE_MAX_CHARS {
        Some(clean_inline(sentence))
    } else {
        None
    }
}

/// Summary from the first prose paragraphs, skipping headers and lists.
pub fn extract_summary(text: &str) -> Option<String> {
    let mut words: Vec<&str> = Vec::new();
    let mut taken = 0;

    for paragraph in paragraphs(text) {
        let lines: Vec<&str> = paragraph
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.iter().any(|l| is_structural(l)) {
            // Options have begun once a structured block appears after prose.
            if taken > 0 {
                break;
            }
            continue;
        }
        let prose: Vec<&str> = lines.into_iter().filter(|l| !HEADER.is_match(l)).collect();
        if prose.is_empty() {
            continue;
        }

        for line in prose {
            words.extend(line.split_whitespace());
        }
        taken += 1;
        if taken >= SUMMARY_MAX_PARAGRAPHS || words.len() >= SUMMARY_MAX_WORDS {
            break;
        }
    }

    if words.is_empty() {
        return None;
    }
    words.truncate(SUMMARY_MAX_WORDS);
    Some(clean_inline(&words.join(" ")))
}

fn split_items(text: &str) -> Vec<String> {
    text.split(';')
        .map(clean_inline)
        .map(|s| s.trim_end_matches('.').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Split a heading remainder into title and inline description.
fn split_heading(rest: &str) -> (String, String) {
    let rest = rest.trim();
    if let Some(inner) = rest.strip_prefix("**") {
        if let Some((title, tail)) = inner.split_once("**") {
            let tail = tail.trim_start_matches([':', '-', '–', '.', ' ']);
            return (clean_inline(title), clean_inline(tail));
        }
    }
    for sep in [": ", " - ", " – "] {
        if let Some((title, tail)) = rest.split_once(sep) {
            return (clean_inline(title), clean_inline(tail));
        }
    }
    (clean_inline(rest).trim_end_matches(':').to_string(), String::new())
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Description,
    Pros,
    Cons,
}

fn finish_option(option: &mut ExtractedOption, description: &[String]) {
    if !description.is_empty() {
        let joined = description.join(" ");
        option.description = if option.description.is_empty() {
            joined
        } else {
            format!("{} {}", option.description, joined)
        };
    }
}

/// Option blocks introduced by "Option N" headings, or by a numbered list
/// when the prose has no such headings.
pub fn extract_options(text: &str) -> Vec<ExtractedOption> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let labelled = lines.iter().any(|l| is_option_heading(l));

    let heading = |line: &str| -> Option<String> {
        if labelled {
            OPTION_HEADING.captures(line).map(|c| c[2].to_string())
        } else {
            NUMBERED.captures(line).map(|c| c[2].to_string())
        }
    };

    let mut options: Vec<ExtractedOption> = Vec::new();
    let mut current: Option<(ExtractedOption, Vec<String>, Section)> = None;

    for line in lines {
        // Options precede the recommendation; its numbered steps are not options.
        if RECOMMENDATION_HEADING.is_match(line) {
            break;
        }
        if let Some(rest) = heading(line) {
            if let Some((mut option, description, _)) = current.take() {
                finish_option(&mut option, &description);
                options.push(option);
            }
            let (title, description) = split_heading(&rest);
            current = Some((
                ExtractedOption {
                    title,
                    description,
                    body: line.to_string(),
                    ..Default::default()
                },
                Vec::new(),
                Section::Description,
            ));
            continue;
        }

        let Some((option, description, section)) = current.as_mut() else {
            continue;
        };
        if line.is_empty() {
            continue;
        }
        // Any other header closes the block.
        if HEADER.is_match(line) {
            let (mut option, description, _) = match current.take() {
                Some(state) => state,
                None => break,
            };
            finish_option(&mut option, &description);
            options.push(option);
            continue;
        }

        option.body.push('\n');
        option.body.push_str(line);

        if let Some(caps) = PROS_LABEL.captures(line) {
            *section = Section::Pros;
            option.pros.extend(split_items(&caps[1]));
        } else if let Some(caps) = CONS_LABEL.captures(line) {
            *section = Section::Cons;
            option.cons.extend(split_items(&caps[1]));
        } else if let Some(caps) = BULLET.captures(line) {
            let item = clean_inline(&caps[1]);
            match section {
                Section::Pros => option.pros.push(item),
                Section::Cons => option.cons.push(item),
                Section::Description => description.push(item),
            }
        } else {
            *section = Section::Description;
            description.push(clean_inline(line));
        }
    }

    if let Some((mut option, description, _)) = current {
        finish_option(&mut option, &description);
        options.push(option);
    }

    options
        .into_iter()
        .filter(|o| !o.title.is_empty())
        .map(|mut o| {
            if o.description.is_empty() {
                o.description = o.title.clone();
            }
            o
        })
        .collect()
}

fn option_index(label: &str) -> Option<usize> {
    match label.to_ascii_lowercase().as_str() {
        "1" | "a" => Some(1),
        "2" | "b" => Some(2),
        "3" | "c" => Some(3),
        _ => None,
    }
}

/// Recommended option and its steps.
pub fn extract_recommendation(text: &str) -> ExtractedRecommendation {
    let option = RECOMMENDED_OPTION
        .captures(text)
        .and_then(|c| option_index(&c[1]));

    let mut recommendation = ExtractedRecommendation {
        option,
        ..Default::default()
    };

    let mut in_section = false;
    for line in text.lines().map(str::trim) {
        if RECOMMENDATION_HEADING.is_match(line) {
            in_section = true;
            recommendation.body.push_str(line);
            continue;
        }
        if !in_section {
            continue;
        }
        if HEADER.is_match(line) {
            break;
        }
        recommendation.body.push('\n');
        recommendation.body.push_str(line);
        if let Some(caps) = BULLET.captures(line) {
            recommendation.steps.push(clean_inline(&caps[1]));
        }
    }
    recommendation
}

/// Questions for the reader, excluding questions about the response itself.
pub fn extract_questions(text: &str) -> Vec<String> {
    let mut questions: Vec<String> = Vec::new();
    for m in QUESTION.find_iter(text) {
        let raw = m.as_str().trim();
        let raw = BULLET
            .captures(raw)
            .map(|c| c.get(1).map_or(raw, |g| g.as_str()))
            .unwrap_or(raw);
        let question = clean_inline(raw);
        if question.chars().count() < MIN_QUESTION_CHARS || META_QUESTION.is_match(&question) {
            continue;
        }
        if !questions.contains(&question) {
            questions.push(question);
        }
    }
    questions
}
