//! Token and cost accounting for one consultation.

use serde::{Deserialize, Serialize};

use crate::providers::GenerationResponse;

/// Accumulated backend usage for a consultation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub total_tokens: u32,

    /// Prompt/input tokens
    pub prompt_tokens: u32,

    /// Completion/output tokens
    pub completion_tokens: u32,

    /// Backend calls that returned a response
    pub llm_calls: u32,

    /// Estimated cost in USD
    pub estimated_cost: f64,
}

impl LlmUsage {
    /// Add one response.
    pub fn add(&mut self, response: &GenerationResponse) {
        self.prompt_tokens += response.input_tokens;
        self.completion_tokens += response.output_tokens;
        self.total_tokens += response.total_tokens();
        self.llm_calls += 1;
        self.estimated_cost += Self::estimate_cost(response);
    }

    /// Fold another tally into this one.
    pub fn merge(&mut self, other: &LlmUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.llm_calls += other.llm_calls;
        self.estimated_cost += other.estimated_cost;
    }

    fn estimate_cost(response: &GenerationResponse) -> f64 {
        // USD per million tokens
        let (input_rate, output_rate) = match response.model.as_str() {
            _ if matches!(response.provider.as_str(), "ollama" | "replay") => (0.0, 0.0),
            m if m.contains("opus") => (5.0, 25.0),
            m if m.contains("haiku") => (1.0, 5.0),
            m if m.contains("sonnet") => (3.0, 15.0),
            _ => (3.0, 15.0),
        };

        (response.input_tokens as f64 / 1_000_000.0) * input_rate
            + (response.output_tokens as f64 / 1_000_000.0) * output_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(provider: &str, model: &str, input: u32, output: u32) -> GenerationResponse {
        GenerationResponse {
            text: String::new(),
            input_tokens: input,
            output_tokens: output,
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }

    #[test]
    fn test_add_accumulates_tokens_and_calls() {
        let mut usage = LlmUsage::default();
        usage.add(&response("anthropic", "claude-sonnet-4-5", 1_000_000, 0));
        usage.add(&response("anthropic", "claude-haiku-4-5", 0, 1_000_000));
        assert_eq!(usage.llm_calls, 2);
        assert_eq!(usage.total_tokens, 2_000_000);
        assert!((usage.estimated_cost - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_local_backends_are_free() {
        let mut usage = LlmUsage::default();
        usage.add(&response("ollama", "llama3.2", 5_000, 5_000));
        assert_eq!(usage.estimated_cost, 0.0);
        assert_eq!(usage.total_tokens, 10_000);
    }

    #[test]
    fn test_merge() {
        let mut a = LlmUsage::default();
        a.add(&response("replay", "replay", 10, 20));
        let mut b = LlmUsage::default();
        b.merge(&a);
        b.merge(&a);
        assert_eq!(b.llm_calls, 2);
        assert_eq!(b.prompt_tokens, 20);
    }
}
