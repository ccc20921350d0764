// learning-engine-rs/src/engine.rs
// The periodic learning cycle.
//
// For every candidate task: mine the trailing telemetry window, recompute
// pattern confidence from scratch, and when the evidence clears the bar
// (and the cooldown has expired) ask the synthesizer to rewrite the task
// into fixed code. Stored rewrites are tagged `learning-rewrite`, version
// retention is enforced, and estimated cost savings are recorded. A failed
// rewrite leaves the current code active and still consumes the cooldown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use code_store::{CodeSource, TaskRef, VersionStore};
use synthesis::metrics::{
    record_learning_attempt, record_learning_cooldown_violation, record_learning_cost_savings,
    record_pattern_confidence, record_resynthesis_trigger,
};
use synthesis::validator::has_blocking_violations;
use synthesis::{AgentSynthesizer, RewriteContext, SynthesisRequest};
use telemetry_query::{SpanFilter, TelemetryQuery, TimeRange};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::confidence::{ConfidenceModel, PatternConfidenceRecord};
use crate::savings::CostSavingsCalculator;
use crate::traces::{analyze_traces, traces_from_spans, PatternAnalysis};
use crate::trigger::TriggerReason;
use crate::{LearningConfig, LearningError, Result};

/// A task the learning engine may rewrite, together with the base
/// synthesis request describing it.
#[derive(Debug, Clone)]
pub struct LearningCandidate {
    pub task: TaskRef,
    pub request: SynthesisRequest,
}

/// Engine-side bookkeeping per task.
#[derive(Debug, Clone, Default)]
pub struct TaskLearningStatus {
    pub trace_count: u64,
    pub rewrite_attempts: u32,
    pub is_symbolic: bool,
    pub confidence: Option<PatternConfidenceRecord>,
}

#[derive(Debug, Default)]
struct TaskState {
    status: TaskLearningStatus,
    last_attempt_at: Option<Instant>,
}

/// Result of one rewrite attempt.
#[derive(Debug, Clone)]
pub enum RewriteOutcome {
    /// New version stored and active.
    Applied { version: u32, daily_savings: f64 },
    /// The synthesizer failed or produced blocking violations; current
    /// code stays active and the cooldown applies.
    Failed { reason: String },
}

/// Summary of one learning cycle.
#[derive(Debug, Clone, Default)]
pub struct LearningCycleReport {
    pub telemetry_available: bool,
    pub tasks_scanned: usize,
    pub tasks_skipped_symbolic: usize,
    pub tasks_below_minimum: usize,
    pub cooldown_blocked: usize,
    pub rewrites_applied: usize,
    pub rewrites_failed: usize,
    pub estimated_daily_savings: f64,
}

/// Interval-driven learning engine. External schedulers call
/// `run_learning_cycle`; the engine never runs on the synthesis request
/// path.
pub struct LearningEngine {
    telemetry: Arc<dyn TelemetryQuery>,
    synthesizer: Arc<dyn AgentSynthesizer>,
    store: Arc<dyn VersionStore>,
    confidence: Arc<dyn ConfidenceModel>,
    config: LearningConfig,
    tasks: Mutex<HashMap<TaskRef, TaskState>>,
}

impl LearningEngine {
    pub fn new(
        telemetry: Arc<dyn TelemetryQuery>,
        synthesizer: Arc<dyn AgentSynthesizer>,
        store: Arc<dyn VersionStore>,
        confidence: Arc<dyn ConfidenceModel>,
        config: LearningConfig,
    ) -> Self {
        Self {
            telemetry,
            synthesizer,
            store,
            confidence,
            config,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Run one learning pass over the candidate tasks.
    #[instrument(name = "run_learning_cycle", skip_all, fields(candidates = candidates.len()))]
    pub async fn run_learning_cycle(&self, candidates: &[LearningCandidate]) -> LearningCycleReport {
        let mut report = LearningCycleReport {
            telemetry_available: self.telemetry.available(),
            ..Default::default()
        };

        if !report.telemetry_available {
            tracing::debug!("telemetry backend unavailable, skipping learning cycle");
            return report;
        }

        for candidate in candidates {
            report.tasks_scanned += 1;
            if let Err(err) = self.process_candidate(candidate, &mut report).await {
                // One broken task never aborts the cycle.
                tracing::warn!(task = %candidate.task, error = %err, "learning pass failed for task");
            }
        }

        tracing::info!(
            scanned = report.tasks_scanned,
            applied = report.rewrites_applied,
            failed = report.rewrites_failed,
            daily_savings = report.estimated_daily_savings,
            "learning cycle completed"
        );
        report
    }

    /// Operator-requested rewrite for a single task. Honors the cooldown
    /// but bypasses the confidence gate.
    pub async fn trigger_manual(&self, candidate: &LearningCandidate) -> Result<RewriteOutcome> {
        let analysis = self.mine_task(candidate).await?;
        if self.in_cooldown(&candidate.task).await {
            record_learning_cooldown_violation(&candidate.task.namespace);
            return Err(LearningError::Blocked(format!(
                "task {} is cooling down",
                candidate.task
            )));
        }
        self.attempt_rewrite(candidate, &analysis, TriggerReason::Manual)
            .await
    }

    /// Engine-side status for a task, if it has been scanned.
    pub async fn task_status(&self, task: &TaskRef) -> Option<TaskLearningStatus> {
        let tasks = self.tasks.lock().await;
        tasks.get(task).map(|s| s.status.clone())
    }

    async fn process_candidate(
        &self,
        candidate: &LearningCandidate,
        report: &mut LearningCycleReport,
    ) -> Result<()> {
        let task = &candidate.task;

        {
            let tasks = self.tasks.lock().await;
            if tasks.get(task).map(|s| s.status.is_symbolic).unwrap_or(false) {
                report.tasks_skipped_symbolic += 1;
                return Ok(());
            }
        }

        let analysis = self.mine_task(candidate).await?;

        if (analysis.sample_count as usize) < self.config.min_executions {
            report.tasks_below_minimum += 1;
            tracing::debug!(
                task = %task,
                traces = analysis.sample_count,
                minimum = self.config.min_executions,
                "not enough executions for pattern analysis"
            );
            return Ok(());
        }

        let confidence = self
            .confidence
            .score(analysis.deterministic_ratio, analysis.sample_count);
        record_pattern_confidence(&task.namespace, &task.name, confidence);

        {
            let mut tasks = self.tasks.lock().await;
            let state = tasks.entry(task.clone()).or_default();
            state.status.confidence = Some(PatternConfidenceRecord {
                task: task.clone(),
                sample_count: analysis.sample_count,
                success_ratio: analysis.success_ratio,
                confidence,
                last_updated: Utc::now(),
            });
        }

        let error_rate = 1.0 - analysis.success_ratio;
        let reason = if analysis.is_deterministic && confidence >= self.config.confidence_threshold
        {
            TriggerReason::PatternDetected
        } else if error_rate > self.config.error_rate_threshold
            && confidence > self.config.error_recovery_min_confidence
        {
            TriggerReason::ErrorRecovery
        } else {
            return Ok(());
        };

        if self.in_cooldown(task).await {
            report.cooldown_blocked += 1;
            record_learning_cooldown_violation(&task.namespace);
            tracing::debug!(task = %task, "rewrite trigger suppressed by cooldown");
            return Ok(());
        }

        match self.attempt_rewrite(candidate, &analysis, reason).await? {
            RewriteOutcome::Applied { daily_savings, .. } => {
                report.rewrites_applied += 1;
                report.estimated_daily_savings += daily_savings;
            }
            RewriteOutcome::Failed { .. } => {
                report.rewrites_failed += 1;
            }
        }
        Ok(())
    }

    async fn mine_task(&self, candidate: &LearningCandidate) -> Result<PatternAnalysis> {
        let filter = SpanFilter {
            task_name: candidate.task.name.clone(),
            namespace: candidate.task.namespace.clone(),
            time_range: Some(TimeRange::last_hours(self.config.trace_window_hours)),
            limit: self.config.span_limit,
            ..Default::default()
        };

        let spans = self.telemetry.query_spans(&filter).await?;
        let traces = traces_from_spans(&spans);

        {
            let mut tasks = self.tasks.lock().await;
            let state = tasks.entry(candidate.task.clone()).or_default();
            state.status.trace_count = traces.len() as u64;
        }

        Ok(analyze_traces(&traces, self.config.determinism_share))
    }

    async fn in_cooldown(&self, task: &TaskRef) -> bool {
        let tasks = self.tasks.lock().await;
        tasks
            .get(task)
            .and_then(|s| s.last_attempt_at)
            .map(|at| at.elapsed() < self.config.cooldown)
            .unwrap_or(false)
    }

    async fn attempt_rewrite(
        &self,
        candidate: &LearningCandidate,
        analysis: &PatternAnalysis,
        reason: TriggerReason,
    ) -> Result<RewriteOutcome> {
        let task = &candidate.task;
        record_resynthesis_trigger(&task.namespace, reason.metric_label());

        {
            let mut tasks = self.tasks.lock().await;
            let state = tasks.entry(task.clone()).or_default();
            state.last_attempt_at = Some(Instant::now());
            state.status.rewrite_attempts += 1;
        }

        let mut request = candidate.request.clone();
        request.rewrite = Some(RewriteContext {
            task_name: task.name.clone(),
            observed_pattern: analysis
                .dominant_sequence
                .clone()
                .unwrap_or_else(|| "no dominant tool sequence".to_string()),
            trace_count: analysis.sample_count,
            success_ratio: analysis.success_ratio,
        });

        tracing::info!(task = %task, reason = %reason, "attempting learning rewrite");

        let response = match self.synthesizer.synthesize_agent(&request).await {
            Ok(response) => response,
            Err(err) => {
                record_learning_attempt(&task.namespace, "failed");
                tracing::warn!(task = %task, error = %err, "rewrite synthesis failed");
                return Ok(RewriteOutcome::Failed {
                    reason: err.to_string(),
                });
            }
        };

        if has_blocking_violations(&response.violations) {
            record_learning_attempt(&task.namespace, "failed");
            tracing::warn!(
                task = %task,
                violations = response.violations.len(),
                "rewritten code failed validation; keeping current version"
            );
            return Ok(RewriteOutcome::Failed {
                reason: "rewritten code failed validation".to_string(),
            });
        }

        let version = self
            .store
            .put_active(task, &response.code, CodeSource::LearningRewrite)
            .await?;
        let evicted = self.store.apply_retention(task, &self.config.retention).await?;
        if !evicted.is_empty() {
            tracing::debug!(task = %task, ?evicted, "pruned code versions after rewrite");
        }

        // Executions per day over the mined window approximates frequency.
        let executions_per_day = ((analysis.sample_count as f64)
            * (24.0 / self.config.trace_window_hours.max(1) as f64))
            .round() as u64;
        let savings = CostSavingsCalculator {
            neural_cost_per_execution: self.config.neural_cost_per_execution,
            symbolic_cost_per_execution: self.config.symbolic_cost_per_execution,
            executions_per_day,
        };
        let daily_savings = savings.daily_savings();
        record_learning_cost_savings(&task.namespace, daily_savings);
        record_learning_attempt(&task.namespace, "success");

        {
            let mut tasks = self.tasks.lock().await;
            let state = tasks.entry(task.clone()).or_default();
            state.status.is_symbolic = true;
        }

        tracing::info!(
            task = %task,
            version = version.version,
            daily_savings,
            "task rewritten to fixed code"
        );

        Ok(RewriteOutcome::Applied {
            version: version.version,
            daily_savings,
        })
    }
}
