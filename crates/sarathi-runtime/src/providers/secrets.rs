//! Backend credentials.
//!
//! Keys are wrapped in [`SecretString`] the moment they are read, so the
//! only way to get at the raw value is an explicit [`ApiCredential::expose`]
//! at the call site that sets the request header.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Provider `options` in the runtime config
    Config,
    Environment,
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// An API key that never shows up in `Debug` or `Display` output.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    /// Human-readable label, e.g. "Anthropic API key"
    label: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, label: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            label,
        }
    }

    /// Read `config[config_key]`, then fall back to `env_var`.
    pub fn from_config_or_env(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        label: &'static str,
    ) -> Result<Self, ProviderError> {
        Self::optional_from_config_or_env(config, config_key, env_var, label).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "{label} required: set '{config_key}' in provider options or the {env_var} \
                 environment variable"
            ))
        })
    }

    /// Like [`ApiCredential::from_config_or_env`], for backends where a key
    /// is optional (a local Ollama needs none, a hosted one does).
    pub fn optional_from_config_or_env(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        label: &'static str,
    ) -> Option<Self> {
        if let Some(value) = config.get(config_key).and_then(JsonValue::as_str) {
            return Some(Self::new(value, CredentialSource::Config, label));
        }
        std::env::var(env_var)
            .ok()
            .filter(|v| !v.is_empty())
            .map(|v| Self::new(v, CredentialSource::Environment, label))
    }

    /// Whether a credential could be loaded, without loading it.
    pub fn is_available(config: &JsonValue, config_key: &str, env_var: &str) -> bool {
        config.get(config_key).and_then(JsonValue::as_str).is_some()
            || std::env::var(env_var).map(|v| !v.is_empty()).unwrap_or(false)
    }

    /// Raw value. Call only where the header is set; never store the result.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("label", &self.label)
            .field("source", &self.source)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (from {}): [REDACTED]", self.label, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "sk-test-9f8e7d6c5b4a";

    #[test]
    fn test_debug_and_display_redact_value() {
        let cred = ApiCredential::new(SECRET, CredentialSource::Programmatic, "Test key");
        let debug = format!("{cred:?}");
        let display = format!("{cred}");
        assert!(!debug.contains(SECRET));
        assert!(!display.contains(SECRET));
        assert!(debug.contains("[REDACTED]"));
        assert!(display.contains("programmatic"));
    }

    #[test]
    fn test_config_value_wins() {
        let config = json!({ "api_key": SECRET });
        let cred = ApiCredential::from_config_or_env(
            &config,
            "api_key",
            "SARATHI_TEST_UNSET_KEY_A",
            "Test key",
        )
        .unwrap();
        assert_eq!(cred.expose(), SECRET);
        assert_eq!(cred.source(), CredentialSource::Config);
    }

    #[test]
    fn test_missing_credential_is_not_configured() {
        let err = ApiCredential::from_config_or_env(
            &json!({}),
            "api_key",
            "SARATHI_TEST_UNSET_KEY_B",
            "Test key",
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
        assert!(!ApiCredential::is_available(
            &json!({}),
            "api_key",
            "SARATHI_TEST_UNSET_KEY_B"
        ));
    }

    #[test]
    fn test_optional_credential_absent() {
        assert!(ApiCredential::optional_from_config_or_env(
            &json!({ "api_key": 42 }),
            "api_key",
            "SARATHI_TEST_UNSET_KEY_C",
            "Test key",
        )
        .is_none());
    }
}
