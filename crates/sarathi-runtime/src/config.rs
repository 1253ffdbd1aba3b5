//! Runtime configuration.
//!
//! One immutable [`RuntimeConfig`] is built at startup and handed to the
//! orchestrator, which passes the relevant slices to each component.
//! Durations serialize as human-readable strings ("30s", "500ms").
//!
//! ```yaml
//! primary:
//!   kind: anthropic
//!   model: claude-sonnet-4-5
//! secondary:
//!   kind: ollama
//!   model: llama3.2
//!   capability: constrained
//! stages:
//!   structure:
//!     temperature: 0.3
//!     max_tokens: 2048
//!     retries: 0
//!     timeout: 60s
//!     retry_temperature: 0.1
//! circuit_breaker:
//!   failure_threshold: 3
//!   recovery_timeout: 30s
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use sarathi_core::{EscalationPolicy, RepairPolicy};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub primary: ProviderSpec,

    /// Escalation target; escalation is skipped when absent
    pub secondary: Option<ProviderSpec>,

    pub pipeline: PipelineConfig,

    pub stages: StagesConfig,

    pub acceptance: AcceptanceConfig,

    pub circuit_breaker: CircuitBreakerConfig,

    pub retry: RetryConfig,

    pub repair: RepairPolicy,

    pub escalation: EscalationPolicy,
}

impl RuntimeConfig {
    /// Parse and validate YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    /// Range-check every tunable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.primary.validate("primary.kind")?;
        if let Some(secondary) = &self.secondary {
            secondary.validate("secondary.kind")?;
        }

        for (field, stage) in [
            ("stages.draft", &self.stages.draft),
            ("stages.critique", &self.stages.critique),
            ("stages.refine", &self.stages.refine),
            ("stages.structure", &self.stages.structure.base),
        ] {
            stage.validate(field)?;
        }
        if let Some(t) = self.stages.structure.retry_temperature {
            check_temperature("stages.structure.retry_temperature", t)?;
        }

        check_temperature(
            "acceptance.classifier_temperature",
            self.acceptance.classifier_temperature,
        )?;
        check_temperature(
            "acceptance.explanation_temperature",
            self.acceptance.explanation_temperature,
        )?;
        if self.acceptance.cache_capacity == 0 {
            return Err(invalid("acceptance.cache_capacity", "must be at least 1"));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(invalid("circuit_breaker.failure_threshold", "must be at least 1"));
        }
        if self.retry.min_delay > self.retry.max_delay {
            return Err(invalid("retry", "min_delay must not exceed max_delay"));
        }

        if self.repair.min_sources == 0 {
            return Err(invalid("repair.min_sources", "must be at least 1"));
        }
        for (field, value) in [
            ("repair.injection_penalty", self.repair.injection_penalty),
            ("repair.default_confidence", self.repair.default_confidence),
            ("escalation.threshold", self.escalation.threshold),
            ("escalation.critical_penalty", self.escalation.critical_penalty),
            ("escalation.important_penalty", self.escalation.important_penalty),
            ("escalation.optional_penalty", self.escalation.optional_penalty),
            ("escalation.floor", self.escalation.floor),
        ] {
            check_unit(field, value)?;
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn check_temperature(field: &'static str, t: f32) -> Result<(), ConfigError> {
    if !(0.0..=2.0).contains(&t) {
        return Err(invalid(field, format!("temperature {t} outside [0, 2]")));
    }
    Ok(())
}

fn check_unit(field: &'static str, v: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&v) {
        return Err(invalid(field, format!("{v} outside [0, 1]")));
    }
    Ok(())
}

/// Full backends get the original prompt on escalation; constrained ones a
/// simplified one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCapability {
    #[default]
    Full,
    Constrained,
}

/// Which backend to build and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Registry kind: "anthropic", "ollama", "replay"
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default)]
    pub capability: ProviderCapability,

    /// Provider-specific options passed to the factory
    #[serde(default = "empty_object")]
    pub options: JsonValue,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Default::default())
}

impl Default for ProviderSpec {
    fn default() -> Self {
        Self {
            kind: "replay".to_string(),
            model: None,
            capability: ProviderCapability::Full,
            options: empty_object(),
        }
    }
}

impl ProviderSpec {
    /// Options with `model` filled in from the spec.
    pub fn merged_options(&self) -> JsonValue {
        let mut options = match &self.options {
            JsonValue::Object(map) => map.clone(),
            _ => Default::default(),
        };
        if let Some(model) = &self.model {
            options
                .entry("model")
                .or_insert_with(|| JsonValue::String(model.clone()));
        }
        JsonValue::Object(options)
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.kind.trim().is_empty() {
            return Err(invalid(field, "provider kind must not be empty"));
        }
        if !self.options.is_object() {
            return Err(invalid(field, "options must be a map"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// draft, critique, refine, structure
    #[default]
    MultiPass,
    /// draft, structure
    Direct,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
}

/// Generation settings for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Retries after the first attempt for transient errors
    pub retries: u32,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl StageSettings {
    pub fn new(temperature: f32, max_tokens: u32, retries: u32, timeout: Duration) -> Self {
        Self {
            temperature,
            max_tokens,
            retries,
            timeout,
        }
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        check_temperature(field, self.temperature)?;
        if self.max_tokens == 0 {
            return Err(invalid(field, "max_tokens must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(invalid(field, "timeout must be positive"));
        }
        Ok(())
    }
}

/// Structure settings add the reduced-temperature retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureSettings {
    #[serde(flatten)]
    pub base: StageSettings,

    /// Temperature for the one extra attempt; `None` disables it
    #[serde(default)]
    pub retry_temperature: Option<f32>,
}

impl Default for StructureSettings {
    fn default() -> Self {
        Self {
            base: StageSettings::new(0.3, 2048, 0, Duration::from_secs(60)),
            retry_temperature: Some(0.1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    pub draft: StageSettings,
    pub critique: StageSettings,
    pub refine: StageSettings,
    pub structure: StructureSettings,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            draft: StageSettings::new(0.8, 2048, 1, Duration::from_secs(90)),
            critique: StageSettings::new(0.3, 1024, 1, Duration::from_secs(60)),
            refine: StageSettings::new(0.5, 2048, 1, Duration::from_secs(90)),
            structure: StructureSettings::default(),
        }
    }
}

/// Two-stage acceptance gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptanceConfig {
    /// Run the model-assessed Stage B
    pub model_check: bool,

    pub classifier_temperature: f32,

    pub classifier_max_tokens: u32,

    #[serde(with = "humantime_serde")]
    pub classifier_timeout: Duration,

    /// Sampling temperature for rejection explanations
    pub explanation_temperature: f32,

    #[serde(with = "humantime_serde")]
    pub explanation_timeout: Duration,

    /// Stage B verdicts kept in memory
    pub cache_capacity: u64,

    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for AcceptanceConfig {
    fn default() -> Self {
        Self {
            model_check: true,
            classifier_temperature: 0.0,
            classifier_max_tokens: 64,
            classifier_timeout: Duration::from_secs(10),
            explanation_temperature: 0.5,
            explanation_timeout: Duration::from_secs(10),
            cache_capacity: 1_000,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive recorded failures before opening
    pub failure_threshold: u32,

    /// Time open before a half-open trial call
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Backoff between transient retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(with = "humantime_serde")]
    pub min_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
