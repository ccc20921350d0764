// learning-engine-rs/src/confidence.rs
// Pattern confidence scoring.
//
// The exact weighting of success ratio versus sample size is a policy
// choice, so the formula is a trait: swap the model without touching the
// engine.

use chrono::{DateTime, Utc};
use code_store::TaskRef;
use serde::{Deserialize, Serialize};

/// Scores how reliably a task's observed behavior can be replaced by
/// fixed code.
pub trait ConfidenceModel: Send + Sync {
    /// `success_ratio` is the share of sampled executions that matched the
    /// dominant deterministic pattern; `sample_count` is the total sample.
    /// Returns a score in [0, 1]. At equal ratios, larger samples must not
    /// score lower.
    fn score(&self, success_ratio: f64, sample_count: u64) -> f64;
}

/// Default model: `ratio * n / (n + k)`.
///
/// The sample-size factor saturates towards 1, so the score approaches the
/// raw ratio as evidence accumulates, and small samples are discounted.
#[derive(Debug, Clone)]
pub struct SampleSaturatingConfidence {
    /// `k`: sample count at which the discount factor reaches one half.
    pub saturation_samples: f64,
}

impl Default for SampleSaturatingConfidence {
    fn default() -> Self {
        // k = 2 keeps the default minimum sample (10 executions, all
        // matching) above the default 0.8 trigger threshold.
        Self {
            saturation_samples: 2.0,
        }
    }
}

impl ConfidenceModel for SampleSaturatingConfidence {
    fn score(&self, success_ratio: f64, sample_count: u64) -> f64 {
        if sample_count == 0 {
            return 0.0;
        }
        let n = sample_count as f64;
        let weight = n / (n + self.saturation_samples);
        (success_ratio * weight).clamp(0.0, 1.0)
    }
}

/// Latest confidence computation for a task. Recomputed from the full
/// available trace window each cycle, never incrementally drifted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfidenceRecord {
    pub task: TaskRef,
    pub sample_count: u64,
    pub success_ratio: f64,
    pub confidence: f64,
    pub last_updated: DateTime<Utc>,
}

impl PatternConfidenceRecord {
    pub fn category(&self) -> &'static str {
        match self.confidence {
            c if c >= 0.9 => "very_high",
            c if c >= 0.8 => "high",
            c if c >= 0.6 => "medium",
            c if c >= 0.4 => "low",
            _ => "very_low",
        }
    }
}
