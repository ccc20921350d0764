// self-heal-rs/src/lib.rs
// Self-healing coordinator for deployed agent code.
//
// Consumes runtime-failure reports and decides between waiting, triggering
// re-synthesis with failure context, or rolling back to the last-known-good
// code version. Bounded by a consecutive-failure threshold, a cooldown
// between re-synthesis attempts, and a per-task attempt cap; once the cap
// is exhausted the task is rolled back and auto-remediation stops until a
// manual reset.

use std::time::Duration;

use serde::{Deserialize, Serialize};

mod classifier;
mod coordinator;
mod error_record;


pub use classifier::{classify_error_message, ErrorClass};
pub use coordinator::{HealOutcome, SelfHealingCoordinator};
pub use error_record::RuntimeErrorRecord;

use code_store::StoreError;
use synthesis::SynthesisError;

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, SelfHealError>;

/// Top-level error type for the self-healing coordinator.
#[derive(Debug, thiserror::Error)]
pub enum SelfHealError {
    #[error("version store error: {0}")]
    Store(#[from] StoreError),

    #[error("re-synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),
}

/// Per-task healing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealState {
    /// Running normally.
    Healthy,
    /// Consecutive failures reached the threshold; remediation pending.
    Degraded,
    /// A re-synthesis attempt is in flight.
    Resynthesizing,
    /// Attempts exhausted; last-known-good code reactivated, automatic
    /// remediation halted until manual intervention.
    RolledBack,
}

impl std::fmt::Display for HealState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealState::Healthy => "healthy",
            HealState::Degraded => "degraded",
            HealState::Resynthesizing => "resynthesizing",
            HealState::RolledBack => "rolled-back",
        };
        f.write_str(s)
    }
}

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct SelfHealConfig {
    /// Consecutive failures before a task is considered degraded.
    pub failure_threshold: u32,
    /// Minimum wait between re-synthesis attempts for one task.
    pub cooldown: Duration,
    /// Re-synthesis attempts per task before rolling back for good.
    pub max_resynthesis_attempts: u32,
    /// Most recent runtime errors retained per task.
    pub max_error_records: usize,
}

impl Default for SelfHealConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(300),
            max_resynthesis_attempts: 3,
            max_error_records: 20,
        }
    }
}
