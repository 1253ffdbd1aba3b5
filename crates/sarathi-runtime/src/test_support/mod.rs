//! Test doubles shared by the runtime's unit tests.

pub(crate) mod fixtures;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::providers::{
    GenerationRequest, GenerationResponse, LlmProvider, OutputMode, ProviderError,
};

/// One request the scripted provider received.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub label: &'static str,
    pub prompt: String,
    pub temperature: f32,
    pub schema_mode: bool,
}

/// Provider that answers from per-label queues.
///
/// Each call pops the label's queue; the last entry stays and repeats.
#[derive(Debug)]
pub(crate) struct ScriptedProvider {
    name: String,
    script: Mutex<HashMap<String, VecDeque<Result<String, ProviderError>>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::named("scripted")
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    fn push(self, label: &str, entry: Result<String, ProviderError>) -> Self {
        self.script
            .lock()
            .entry(label.to_string())
            .or_default()
            .push_back(entry);
        self
    }

    pub fn text(self, label: &str, text: &str) -> Self {
        self.push(label, Ok(text.to_string()))
    }

    pub fn json(self, label: &str, value: JsonValue) -> Self {
        self.push(label, Ok(value.to_string()))
    }

    pub fn fail(self, label: &str, error: ProviderError) -> Self {
        self.push(label, Err(error))
    }

    /// Delay every response, for timeout tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, label: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.label == label).count()
    }

    fn next(&self, label: &str) -> Option<Result<String, ProviderError>> {
        let mut script = self.script.lock();
        let queue = script.get_mut(label)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, ProviderError> {
        self.calls.lock().push(RecordedCall {
            label: request.label,
            prompt: request.prompt.clone(),
            temperature: request.temperature,
            schema_mode: matches!(request.output_mode, OutputMode::Schema(_)),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let text = self.next(request.label).ok_or_else(|| {
            ProviderError::NotConfigured(format!("no script for label '{}'", request.label))
        })??;

        Ok(GenerationResponse {
            input_tokens: self.estimate_tokens(&request.prompt),
            output_tokens: self.estimate_tokens(&text),
            text,
            provider: self.name.clone(),
            model: self.model().to_string(),
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "scripted-model"
    }
}
