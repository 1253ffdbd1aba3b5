//! JSON extraction from model prose.
//!
//! Models wrap structured output in code fences or surround it with
//! commentary. Extraction finds the first balanced, parseable object.

use serde_json::Value as JsonValue;

/// Extract the first JSON object embedded in `text`.
pub fn extract_json_object(text: &str) -> Option<JsonValue> {
    let trimmed = strip_code_fence(text.trim());

    if let Ok(value @ JsonValue::Object(_)) = serde_json::from_str::<JsonValue>(trimmed) {
        return Some(value);
    }

    let mut search_from = 0;
    while let Some(offset) = trimmed[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_object_end(&trimmed[start..]) {
            let candidate = &trimmed[start..start + end];
            if let Ok(value @ JsonValue::Object(_)) = serde_json::from_str::<JsonValue>(candidate) {
                return Some(value);
            }
        }
        search_from = start + 1;
    }
    None
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json", "JSON", ...) up to the first newline.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Byte length of the balanced `{...}` at the start of `text`.
fn balanced_object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_object() {
        let value = extract_json_object(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_fenced_object() {
        let value = extract_json_object("```json\n{\"a\": {\"b\": 2}}\n```").unwrap();
        assert_eq!(value["a"]["b"], 2);
    }

    #[test]
    fn test_object_inside_commentary() {
        let text = "Here is the analysis you asked for:\n{\"summary\": \"use {braces} carefully\"}\nHope it helps.";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["summary"], "use {braces} carefully");
    }

    #[test]
    fn test_arrays_and_garbage_are_rejected() {
        assert!(extract_json_object("[1, 2, 3]").is_none());
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("{ unterminated").is_none());
    }
}
