// synthesis-service-rs/src/metrics.rs
// Synthesis pipeline metrics via the `metrics` facade. The embedding
// process decides on the exporter.

use metrics::{counter, histogram};

pub fn record_synthesis_attempt(scope: &str, outcome: &str) {
    counter!(
        "synthesis_attempts_total",
        1,
        "scope" => scope.to_string(),
        "outcome" => outcome.to_string()
    );
}

pub fn record_fallback(scope: &str) {
    counter!("synthesis_fallbacks_total", 1, "scope" => scope.to_string());
}

pub fn record_rate_limit_rejection(scope: &str) {
    counter!("synthesis_rate_limited_total", 1, "scope" => scope.to_string());
}

pub fn record_quota_rejection(scope: &str, kind: &str) {
    counter!(
        "synthesis_quota_rejections_total",
        1,
        "scope" => scope.to_string(),
        "kind" => kind.to_string()
    );
}

pub fn observe_synthesis_duration(seconds: f64) {
    histogram!("synthesis_duration_seconds", seconds);
}

pub fn record_resynthesis_trigger(scope: &str, reason: &str) {
    counter!(
        "resynthesis_triggers_total",
        1,
        "scope" => scope.to_string(),
        "reason" => reason.to_string()
    );
}

pub fn record_rollback(scope: &str) {
    counter!("self_heal_rollbacks_total", 1, "scope" => scope.to_string());
}

pub fn record_learning_attempt(scope: &str, outcome: &str) {
    counter!(
        "learning_attempts_total",
        1,
        "scope" => scope.to_string(),
        "outcome" => outcome.to_string()
    );
}

pub fn record_learning_cooldown_violation(scope: &str) {
    counter!("learning_cooldown_violations_total", 1, "scope" => scope.to_string());
}

pub fn record_pattern_confidence(scope: &str, task: &str, confidence: f64) {
    histogram!(
        "learning_pattern_confidence",
        confidence,
        "scope" => scope.to_string(),
        "task" => task.to_string()
    );
}

pub fn record_learning_cost_savings(scope: &str, daily_savings: f64) {
    histogram!(
        "learning_daily_cost_savings",
        daily_savings,
        "scope" => scope.to_string()
    );
}
