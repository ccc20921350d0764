use std::collections::HashMap;

use chrono::{Duration, Utc};
use telemetry_query::Span;

use crate::confidence::{ConfidenceModel, SampleSaturatingConfidence};
use crate::savings::CostSavingsCalculator;
use crate::traces::{analyze_traces, traces_from_spans, TaskTrace};

fn trace(success: bool, tools: &[&str]) -> TaskTrace {
    TaskTrace {
        task_name: "fetch".to_string(),
        timestamp: Utc::now(),
        duration_ms: 40,
        success,
        tool_sequence: tools.iter().map(|s| s.to_string()).collect(),
        output_digest: None,
    }
}

#[test]
fn confidence_is_zero_without_samples() {
    let model = SampleSaturatingConfidence::default();
    assert_eq!(model.score(1.0, 0), 0.0);
}

#[test]
fn confidence_grows_with_sample_size_at_equal_ratio() {
    let model = SampleSaturatingConfidence::default();

    let small = model.score(0.9, 10);
    let large = model.score(0.9, 100);
    assert!(large > small, "larger samples must score higher");
    assert!(large < 0.9, "score approaches the ratio from below");
    assert!(model.score(1.0, 1_000_000) > 0.99);
}

#[test]
fn confidence_stays_within_unit_interval() {
    let model = SampleSaturatingConfidence::default();
    for &(ratio, n) in &[(0.0, 10u64), (0.5, 3), (1.0, 1), (1.0, 10_000)] {
        let score = model.score(ratio, n);
        assert!((0.0..=1.0).contains(&score), "score {score} out of range");
    }
}

#[test]
fn analysis_detects_a_dominant_sequence() {
    let mut traces = Vec::new();
    for _ in 0..9 {
        traces.push(trace(true, &["sheets", "email"]));
    }
    traces.push(trace(false, &["sheets"]));

    let analysis = analyze_traces(&traces, 0.9);
    assert_eq!(analysis.sample_count, 10);
    assert_eq!(analysis.success_count, 9);
    assert!((analysis.success_ratio - 0.9).abs() < 1e-9);
    assert_eq!(analysis.dominant_sequence.as_deref(), Some("sheets,email"));
    assert!((analysis.dominant_share - 1.0).abs() < 1e-9);
    assert!((analysis.deterministic_ratio - 0.9).abs() < 1e-9);
    assert!(analysis.is_deterministic);
}

#[test]
fn analysis_rejects_scattered_sequences() {
    let mut traces = Vec::new();
    for i in 0..12 {
        let tools: &[&str] = if i % 2 == 0 { &["a", "b"] } else { &["b", "a"] };
        traces.push(trace(true, tools));
    }

    let analysis = analyze_traces(&traces, 0.9);
    assert_eq!(analysis.unique_sequences, 2);
    assert!(analysis.dominant_share < 0.9);
    assert!(!analysis.is_deterministic);
}

#[test]
fn analysis_of_empty_window_is_inert() {
    let analysis = analyze_traces(&[], 0.9);
    assert_eq!(analysis.sample_count, 0);
    assert_eq!(analysis.success_ratio, 0.0);
    assert!(analysis.dominant_sequence.is_none());
    assert!(!analysis.is_deterministic);
}

#[test]
fn spans_become_traces_with_tool_sequences() {
    let mut attributes = HashMap::new();
    attributes.insert("tools".to_string(), "sheets, email".to_string());
    attributes.insert("output_digest".to_string(), "abc123".to_string());

    let span = Span {
        trace_id: "t1".to_string(),
        span_id: "s1".to_string(),
        task_name: "fetch".to_string(),
        agent: "reporter".to_string(),
        namespace: "default".to_string(),
        started_at: Utc::now() - Duration::minutes(5),
        duration_ms: 80,
        success: true,
        error_message: None,
        attributes,
    };

    let traces = traces_from_spans(&[span]);
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].tool_sequence, vec!["sheets", "email"]);
    assert_eq!(traces[0].output_digest.as_deref(), Some("abc123"));
    assert!(traces[0].success);
}

#[test]
fn savings_math_matches_the_estimate() {
    let calc = CostSavingsCalculator {
        neural_cost_per_execution: 0.01,
        symbolic_cost_per_execution: 0.000_1,
        executions_per_day: 10,
    };

    assert!((calc.daily_savings() - 0.099).abs() < 1e-9);
    assert!((calc.projected_monthly_savings() - 2.97).abs() < 1e-9);

    // Converting never "costs" in the estimate.
    let inverted = CostSavingsCalculator {
        neural_cost_per_execution: 0.000_1,
        symbolic_cost_per_execution: 0.01,
        executions_per_day: 10,
    };
    assert_eq!(inverted.daily_savings(), 0.0);
}
