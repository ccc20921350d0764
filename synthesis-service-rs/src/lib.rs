// synthesis-service-rs/src/lib.rs
// Core synthesis pipeline for the Loom control plane: turns natural-language
// task instructions into agent DSL code, under rate and quota budgets, with
// structural validation against the external grammar.
//
// The pieces compose as: RateLimiter + QuotaManager gate a request, the
// Synthesizer builds a prompt and calls the language-model capability
// (falling back to a deterministic template when the generator misbehaves),
// and the CodeValidator attaches violations before the caller decides
// whether to activate the result. `GatedSynthesizer` wires the sequence up
// for external reconcilers.

use std::time::Duration;

pub mod command;
pub mod cost_tracker;
pub mod intent;
pub mod metrics;
pub mod pipeline;
pub mod prompt;
pub mod quota_manager;
pub mod rate_limiter;
pub mod schema;
pub mod synthesizer;
pub mod template;
pub mod validator;

#[cfg(test)]
mod tests;

pub use cost_tracker::{estimate_tokens, CostTracker, SynthesisCost};
pub use intent::{detect_temporal_intent, schedule_expression, TemporalIntent};
pub use pipeline::GatedSynthesizer;
pub use quota_manager::{CostReservation, QuotaError, QuotaLimits, QuotaManager};
pub use rate_limiter::{RateDecision, RateLimiter, RateLimiterConfig};
pub use schema::{
    CommandSchemaProvider, CompatibilityLevel, DslSchema, SchemaClient, SchemaError,
    SchemaProvider, SemanticVersion,
};
pub use synthesizer::{
    AgentSynthesizer, ErrorContext, RewriteContext, RuntimeErrorSummary, SynthesisRequest,
    SynthesisResponse, Synthesizer, SynthesizerConfig,
};
pub use template::generate_fallback_code;
pub use validator::{
    CodeValidator, CommandValidator, NoopValidator, Severity, StructuralChecker,
    ValidationOutcome, Violation,
};

/// Result type used across the synthesis pipeline.
pub type Result<T> = std::result::Result<T, SynthesisError>;

/// Errors surfaced to callers of the synthesis pipeline.
///
/// Budget and safety boundaries (rate limit, quota, empty input) surface
/// here so the caller can make a policy decision; generator and provider
/// trouble is recovered internally and never reaches this enum unless the
/// deterministic fallback itself cannot be built.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("synthesis instructions are empty or whitespace-only")]
    EmptyInstructions,

    #[error(
        "synthesis rate limit exceeded for scope {scope}: retry in {} seconds",
        .retry_after.as_secs()
    )]
    RateLimitExceeded { scope: String, retry_after: Duration },

    #[error(transparent)]
    QuotaExceeded(#[from] QuotaError),

    #[error("generator failure with no usable fallback: {0}")]
    GeneratorFailure(String),
}
