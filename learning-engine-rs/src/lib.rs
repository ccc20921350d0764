// learning-engine-rs/src/lib.rs
// Learning engine: mines execution telemetry for tasks whose behavior has
// become deterministic, and rewrites them from model-backed ("neural")
// definitions into fixed ("symbolic") code through the synthesizer.
//
// Runs on its own interval, never on the request path. Cooldowns and the
// synthesis-side budgets bound how often it can contend for the generator
// concurrently with interactive requests.

use std::time::Duration;

use code_store::{RetentionPolicy, StoreError};
use synthesis::SynthesisError;
use telemetry_query::TelemetryError;

mod confidence;
mod engine;
mod savings;
mod traces;
mod trigger;

#[cfg(test)]
mod tests;

pub use confidence::{ConfidenceModel, PatternConfidenceRecord, SampleSaturatingConfidence};
pub use engine::{
    LearningCandidate, LearningCycleReport, LearningEngine, RewriteOutcome, TaskLearningStatus,
};
pub use savings::CostSavingsCalculator;
pub use traces::{analyze_traces, traces_from_spans, PatternAnalysis, TaskTrace};
pub use trigger::TriggerReason;

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, LearningError>;

/// Top-level error type for the learning engine.
#[derive(Debug, thiserror::Error)]
pub enum LearningError {
    #[error("version store error: {0}")]
    Store(#[from] StoreError),

    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("rewrite synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("rewrite blocked: {0}")]
    Blocked(String),
}

/// Learning engine settings.
#[derive(Debug, Clone)]
pub struct LearningConfig {
    /// Minimum recorded executions before a task is considered.
    pub min_executions: usize,
    /// Confidence required to trigger a pattern rewrite.
    pub confidence_threshold: f64,
    /// Minimum wait between rewrite attempts for one task.
    pub cooldown: Duration,
    /// Trailing telemetry window mined each cycle.
    pub trace_window_hours: i64,
    /// Span query limit per task per cycle.
    pub span_limit: usize,
    /// A dominant tool sequence must cover this share of successful
    /// executions for the task to count as deterministic.
    pub determinism_share: f64,
    /// Error rate above which a moderately-confident task is rewritten
    /// for error recovery rather than pattern detection.
    pub error_rate_threshold: f64,
    /// Confidence floor for error-recovery rewrites.
    pub error_recovery_min_confidence: f64,
    /// Version retention applied after each stored rewrite.
    pub retention: RetentionPolicy,
    /// Estimated per-execution cost of a neural task, for savings.
    pub neural_cost_per_execution: f64,
    /// Estimated per-execution cost of a symbolic task, for savings.
    pub symbolic_cost_per_execution: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_executions: 10,
            confidence_threshold: 0.8,
            cooldown: Duration::from_secs(600),
            trace_window_hours: 24,
            span_limit: 200,
            determinism_share: 0.9,
            error_rate_threshold: 0.2,
            error_recovery_min_confidence: 0.5,
            retention: RetentionPolicy {
                keep_last_n: 5,
                always_keep_initial: true,
            },
            neural_cost_per_execution: 0.01,
            symbolic_cost_per_execution: 0.000_1,
        }
    }
}
