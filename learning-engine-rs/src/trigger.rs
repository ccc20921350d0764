// learning-engine-rs/src/trigger.rs
// Learning trigger reasons and their metric categorization.

use serde::{Deserialize, Serialize};

/// Why a rewrite was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerReason {
    /// Telemetry shows deterministic behavior above the confidence bar.
    PatternDetected,
    /// High error rate with moderate confidence; rewrite to stabilize.
    ErrorRecovery,
    /// Operator-requested rewrite.
    Manual,
}

impl TriggerReason {
    /// Stable label used on metrics.
    pub fn metric_label(&self) -> &'static str {
        match self {
            TriggerReason::PatternDetected => "pattern_detection",
            TriggerReason::ErrorRecovery => "error_recovery",
            TriggerReason::Manual => "manual",
        }
    }
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.metric_label())
    }
}
