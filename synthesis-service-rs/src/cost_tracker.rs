// synthesis-service-rs/src/cost_tracker.rs
// Token estimation and cost accounting for generation calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Estimate token count from text. Rough model: one token per four
/// characters of English text, plus a 10% safety buffer. Used for cost
/// prediction before the API call and for attribution afterwards when the
/// provider reports no usage.
pub fn estimate_tokens(text: &str) -> u64 {
    ((text.len() as f64) / 4.0 * 1.1).ceil() as u64
}

/// Cost of a single synthesis operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisCost {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub currency: String,
    pub model_name: String,
    pub timestamp: DateTime<Utc>,
}

impl SynthesisCost {
    pub fn exceeds_budget(&self, max_cost: f64) -> bool {
        self.total_cost > max_cost
    }
}

impl std::fmt::Display for SynthesisCost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "synthesis cost: {:.4} {} (input: {} tokens / {:.4}, output: {} tokens / {:.4})",
            self.total_cost,
            self.currency,
            self.input_tokens,
            self.input_cost,
            self.output_tokens,
            self.output_cost,
        )
    }
}

/// Computes call costs from per-1K-token model pricing.
#[derive(Debug, Clone)]
pub struct CostTracker {
    input_token_cost: f64,
    output_token_cost: f64,
    currency: String,
}

impl CostTracker {
    /// `input_token_cost`/`output_token_cost` are per 1,000 tokens.
    pub fn new(input_token_cost: f64, output_token_cost: f64, currency: impl Into<String>) -> Self {
        Self {
            input_token_cost,
            output_token_cost,
            currency: currency.into(),
        }
    }

    /// Tracker that always reports zero cost (cost tracking disabled).
    pub fn disabled() -> Self {
        Self::new(0.0, 0.0, "USD")
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Compute the cost of a completed call from token counts.
    pub fn calculate_cost(
        &self,
        input_tokens: u64,
        output_tokens: u64,
        model_name: &str,
    ) -> SynthesisCost {
        let input_cost = (input_tokens as f64 / 1_000.0) * self.input_token_cost;
        let output_cost = (output_tokens as f64 / 1_000.0) * self.output_token_cost;

        SynthesisCost {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
            currency: self.currency.clone(),
            model_name: model_name.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Predict the cost of a call before making it.
    pub fn estimate_cost(
        &self,
        prompt_text: &str,
        expected_output_tokens: u64,
        model_name: &str,
    ) -> SynthesisCost {
        self.calculate_cost(estimate_tokens(prompt_text), expected_output_tokens, model_name)
    }
}
