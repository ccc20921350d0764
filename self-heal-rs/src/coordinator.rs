// self-heal-rs/src/coordinator.rs
// Per-task healing state machine: Healthy -> Degraded -> Resynthesizing ->
// (RolledBack | Healthy).
//
// Transitions for one task are serialized behind a per-task lock so two
// failure reports can never race a re-synthesis on the same code history;
// distinct tasks heal independently and concurrently.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use code_store::{CodeSource, TaskRef, VersionStore};
use synthesis::metrics::{record_resynthesis_trigger, record_rollback};
use synthesis::validator::has_blocking_violations;
use synthesis::{AgentSynthesizer, ErrorContext, RuntimeErrorSummary, SynthesisRequest};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::error_record::RuntimeErrorRecord;
use crate::{HealState, Result, SelfHealConfig};

/// What the coordinator decided for one failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealOutcome {
    /// Failure recorded; below the degradation threshold.
    Recorded { consecutive_failures: u32 },
    /// Degraded, but the cooldown since the last attempt has not elapsed.
    CoolingDown { remaining: Duration },
    /// Re-synthesis produced valid code; the new version is active.
    Resynthesized { version: u32 },
    /// The attempt failed; the task stays degraded until the next report.
    ResynthesisFailed { attempts: u32 },
    /// Attempt cap exhausted (or nothing left to try): last-known-good code
    /// reactivated. None when no known-good version exists.
    RolledBack { version: Option<u32> },
    /// Auto-remediation is halted for this task; report ignored.
    Halted,
}

#[derive(Debug)]
struct TaskHealState {
    state: HealState,
    consecutive_failures: u32,
    resynthesis_attempts: u32,
    last_attempt_at: Option<Instant>,
    recent_errors: VecDeque<RuntimeErrorRecord>,
}

impl TaskHealState {
    fn new() -> Self {
        Self {
            state: HealState::Healthy,
            consecutive_failures: 0,
            resynthesis_attempts: 0,
            last_attempt_at: None,
            recent_errors: VecDeque::new(),
        }
    }
}

/// Reacts to runtime failures of deployed agent code.
pub struct SelfHealingCoordinator {
    synthesizer: Arc<dyn AgentSynthesizer>,
    store: Arc<dyn VersionStore>,
    config: SelfHealConfig,
    tasks: Mutex<HashMap<TaskRef, Arc<Mutex<TaskHealState>>>>,
}

impl SelfHealingCoordinator {
    pub fn new(
        synthesizer: Arc<dyn AgentSynthesizer>,
        store: Arc<dyn VersionStore>,
        config: SelfHealConfig,
    ) -> Self {
        Self {
            synthesizer,
            store,
            config,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Process one runtime failure report for `task`. `base_request`
    /// describes the task as the reconciler knows it (instructions, tools,
    /// models); the coordinator enriches it with failure context before
    /// re-synthesizing.
    #[instrument(name = "report_runtime_failure", skip_all, fields(task = %task))]
    pub async fn report_runtime_failure(
        &self,
        task: &TaskRef,
        base_request: &SynthesisRequest,
        record: RuntimeErrorRecord,
    ) -> Result<HealOutcome> {
        let entry = self.task_state(task).await;
        let mut st = entry.lock().await;

        if st.state == HealState::RolledBack {
            tracing::debug!("auto-remediation halted, ignoring failure report");
            return Ok(HealOutcome::Halted);
        }

        st.recent_errors.push_back(record);
        while st.recent_errors.len() > self.config.max_error_records {
            st.recent_errors.pop_front();
        }
        st.consecutive_failures += 1;

        if st.consecutive_failures < self.config.failure_threshold {
            return Ok(HealOutcome::Recorded {
                consecutive_failures: st.consecutive_failures,
            });
        }

        if st.state == HealState::Healthy {
            st.state = HealState::Degraded;
            tracing::warn!(
                consecutive_failures = st.consecutive_failures,
                threshold = self.config.failure_threshold,
                "task degraded"
            );
        }

        if st.resynthesis_attempts >= self.config.max_resynthesis_attempts {
            return self.roll_back(task, &mut st).await;
        }

        if let Some(last) = st.last_attempt_at {
            let elapsed = last.elapsed();
            if elapsed < self.config.cooldown {
                let remaining = self.config.cooldown - elapsed;
                tracing::debug!(remaining_secs = remaining.as_secs(), "re-synthesis cooling down");
                return Ok(HealOutcome::CoolingDown { remaining });
            }
        }

        st.state = HealState::Resynthesizing;
        st.resynthesis_attempts += 1;
        st.last_attempt_at = Some(Instant::now());
        record_resynthesis_trigger(&task.namespace, "error_recovery");

        let request = self.build_retry_request(task, base_request, &st).await;
        let attempt = st.resynthesis_attempts;

        tracing::info!(attempt, "re-synthesizing failed task code");
        match self.synthesizer.synthesize_agent(&request).await {
            Ok(response) if !has_blocking_violations(&response.violations) => {
                let version = self
                    .store
                    .put_active(task, &response.code, CodeSource::SelfHeal)
                    .await?;
                st.state = HealState::Healthy;
                st.consecutive_failures = 0;
                tracing::info!(version = version.version, "re-synthesis recovered the task");
                Ok(HealOutcome::Resynthesized {
                    version: version.version,
                })
            }
            Ok(response) => {
                tracing::warn!(
                    violations = response.violations.len(),
                    "re-synthesized code failed validation"
                );
                self.after_failed_attempt(task, &mut st, attempt).await
            }
            Err(err) => {
                tracing::warn!(error = %err, "re-synthesis attempt failed");
                self.after_failed_attempt(task, &mut st, attempt).await
            }
        }
    }

    /// Record a successful execution: the task returns to Healthy, the
    /// failure streak resets and the active version becomes the rollback
    /// target.
    pub async fn record_success(&self, task: &TaskRef) -> Result<()> {
        let entry = self.task_state(task).await;
        let mut st = entry.lock().await;

        st.consecutive_failures = 0;
        if st.state != HealState::Healthy {
            tracing::info!(previous = %st.state, "task recovered");
            st.state = HealState::Healthy;
        }
        drop(st);

        self.store.mark_known_good(task).await?;
        Ok(())
    }

    /// Re-enable auto-remediation for a halted task.
    pub async fn manual_reset(&self, task: &TaskRef) {
        let entry = self.task_state(task).await;
        let mut st = entry.lock().await;
        st.state = HealState::Healthy;
        st.consecutive_failures = 0;
        st.resynthesis_attempts = 0;
        st.last_attempt_at = None;
        tracing::info!(task = %task, "healing state manually reset");
    }

    /// Current healing state of a task, if tracked.
    pub async fn state(&self, task: &TaskRef) -> Option<HealState> {
        let tasks = self.tasks.lock().await;
        let entry = tasks.get(task)?.clone();
        drop(tasks);
        let st = entry.lock().await;
        Some(st.state)
    }

    /// Retained runtime errors for a task, oldest first.
    pub async fn recent_errors(&self, task: &TaskRef) -> Vec<RuntimeErrorRecord> {
        let tasks = self.tasks.lock().await;
        let entry = match tasks.get(task) {
            Some(e) => e.clone(),
            None => return Vec::new(),
        };
        drop(tasks);
        let st = entry.lock().await;
        st.recent_errors.iter().cloned().collect()
    }

    async fn after_failed_attempt(
        &self,
        task: &TaskRef,
        st: &mut TaskHealState,
        attempts: u32,
    ) -> Result<HealOutcome> {
        if attempts >= self.config.max_resynthesis_attempts {
            return self.roll_back(task, st).await;
        }
        st.state = HealState::Degraded;
        Ok(HealOutcome::ResynthesisFailed { attempts })
    }

    async fn roll_back(&self, task: &TaskRef, st: &mut TaskHealState) -> Result<HealOutcome> {
        st.state = HealState::RolledBack;
        record_rollback(&task.namespace);

        match self.store.last_known_good(task).await? {
            Some(good) => {
                self.store.activate(task, good.version).await?;
                tracing::warn!(
                    version = good.version,
                    "re-synthesis attempts exhausted, rolled back to last known good code"
                );
                Ok(HealOutcome::RolledBack {
                    version: Some(good.version),
                })
            }
            None => {
                tracing::error!(
                    "re-synthesis attempts exhausted and no known-good version exists; \
                     manual intervention required"
                );
                Ok(HealOutcome::RolledBack { version: None })
            }
        }
    }

    async fn build_retry_request(
        &self,
        task: &TaskRef,
        base: &SynthesisRequest,
        st: &TaskHealState,
    ) -> SynthesisRequest {
        let runtime_errors: Vec<RuntimeErrorSummary> = st
            .recent_errors
            .iter()
            .rev()
            .take(5)
            .map(|e| RuntimeErrorSummary {
                timestamp: e.timestamp.to_rfc3339(),
                error_type: e.class.to_string(),
                error_message: e.message.clone(),
                exit_code: e.exit_code,
                synthesis_attempt: e.synthesis_attempt,
            })
            .collect();

        let last_crash_log = st
            .recent_errors
            .back()
            .map(|e| e.message.clone())
            .unwrap_or_default();

        let last_known_good_code = match self.store.last_known_good(task).await {
            Ok(Some(good)) => Some(good.content),
            Ok(None) => None,
            Err(err) => {
                tracing::debug!(error = %err, "no last-known-good code available");
                None
            }
        };

        let mut request = base.clone();
        request.is_retry = true;
        request.attempt_number = st.resynthesis_attempts;
        request.last_known_good_code = last_known_good_code;
        request.error_context = Some(ErrorContext {
            runtime_errors,
            validation_errors: Vec::new(),
            last_crash_log,
            consecutive_failures: st.consecutive_failures,
            previous_attempts: st.resynthesis_attempts.saturating_sub(1),
        });
        request
    }

    async fn task_state(&self, task: &TaskRef) -> Arc<Mutex<TaskHealState>> {
        let mut tasks = self.tasks.lock().await;
        Arc::clone(
            tasks
                .entry(task.clone())
                .or_insert_with(|| Arc::new(Mutex::new(TaskHealState::new()))),
        )
    }
}
