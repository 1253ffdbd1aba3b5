//! JSON Schema for the structured consultation result.
//!
//! The same schema is handed to backends that support native schema mode
//! and used to check repaired results before they leave the pipeline.

use serde_json::Value as JsonValue;
use std::sync::OnceLock;
use thiserror::Error;

/// Schema version tag recorded alongside every structured pass.
pub const SCHEMA_VERSION: &str = "2025-11-01";

/// Embedded result schema (loaded at compile time).
const RESULT_SCHEMA_JSON: &str = include_str!("../schema/structured_result.schema.json");

static SCHEMA_VALUE: OnceLock<Result<JsonValue, String>> = OnceLock::new();
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

/// The result schema as a JSON value.
pub fn result_schema() -> Result<&'static JsonValue, SchemaError> {
    SCHEMA_VALUE
        .get_or_init(|| {
            serde_json::from_str(RESULT_SCHEMA_JSON)
                .map_err(|e| format!("Invalid schema JSON: {}", e))
        })
        .as_ref()
        .map_err(|e| SchemaError::LoadError(e.clone()))
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value = result_schema().map_err(|e| e.to_string())?;
        jsonschema::options()
            .build(schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(SchemaError::LoadError(e.clone())),
    }
}

/// Validate a result value against the schema.
///
/// Returns every violation as "message at /instance/path".
pub fn validate_result(value: &JsonValue) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Number of schema violations in a value (0 when valid).
pub fn violation_count(value: &JsonValue) -> usize {
    validate_result(value).err().map_or(0, |errors| errors.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_result() -> JsonValue {
        let option = json!({
            "title": "Speak up",
            "description": "Raise the concern openly.",
            "pros": ["Integrity"],
            "cons": ["Friction"],
            "sources": ["BG_2_47"]
        });
        json!({
            "executive_summary": "A summary.",
            "options": [option.clone(), option.clone(), option],
            "recommended_action": { "option": 1, "steps": ["Talk first"], "sources": ["BG_2_47"] },
            "reflection_prompts": ["What matters most?", "Who is affected?"],
            "sources": [{ "id": "BG_2_47", "gloss": "Act without attachment", "relevance": 0.9 }],
            "confidence": 0.8,
            "scholar_flag": false
        })
    }

    #[test]
    fn test_schema_loads() {
        assert!(result_schema().is_ok());
    }

    #[test]
    fn test_valid_result_passes() {
        assert!(validate_result(&valid_result()).is_ok());
    }

    #[test]
    fn test_two_options_fail() {
        let mut value = valid_result();
        value["options"].as_array_mut().unwrap().pop();
        let errors = validate_result(&value).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("/options")));
    }

    #[test]
    fn test_bad_source_id_fails() {
        let mut value = valid_result();
        value["sources"][0]["id"] = json!("verse 2.47");
        assert!(violation_count(&value) >= 1);
    }
}
