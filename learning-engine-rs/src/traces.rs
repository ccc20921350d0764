// learning-engine-rs/src/traces.rs
// Execution trace derivation and pattern analysis.
//
// Spans from the telemetry backend become `TaskTrace`s; pattern analysis
// looks for a dominant tool-call sequence across the successful traces.
// A task is deterministic when one sequence covers a configured share of
// its successful executions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use telemetry_query::Span;

/// One task execution derived from a telemetry span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTrace {
    pub task_name: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    /// Ordered tool calls made during the execution.
    pub tool_sequence: Vec<String>,
    /// Digest of the produced output, when the runtime recorded one.
    pub output_digest: Option<String>,
}

/// Span attribute carrying the comma-separated tool-call sequence.
const TOOLS_ATTRIBUTE: &str = "tools";
/// Span attribute carrying the output digest.
const OUTPUT_DIGEST_ATTRIBUTE: &str = "output_digest";

/// Convert telemetry spans into task traces.
pub fn traces_from_spans(spans: &[Span]) -> Vec<TaskTrace> {
    spans
        .iter()
        .map(|span| TaskTrace {
            task_name: span.task_name.clone(),
            timestamp: span.started_at,
            duration_ms: span.duration_ms,
            success: span.success,
            tool_sequence: span
                .attributes
                .get(TOOLS_ATTRIBUTE)
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            output_digest: span.attributes.get(OUTPUT_DIGEST_ATTRIBUTE).cloned(),
        })
        .collect()
}

/// Result of mining one task's trace window.
#[derive(Debug, Clone)]
pub struct PatternAnalysis {
    pub sample_count: u64,
    pub success_count: u64,
    /// Successful executions over the total sample.
    pub success_ratio: f64,
    /// Share of the total sample that succeeded with the dominant
    /// sequence; this is the ratio confidence models score.
    pub deterministic_ratio: f64,
    /// The dominant tool sequence, comma-joined. None without successes.
    pub dominant_sequence: Option<String>,
    /// Share of successful executions covered by the dominant sequence.
    pub dominant_share: f64,
    pub unique_sequences: u32,
    pub is_deterministic: bool,
}

/// Analyze a task's traces over the full retained window.
///
/// Ratios are recomputed from scratch on every call: no decayed averages,
/// so stale data can never drift the outcome.
pub fn analyze_traces(traces: &[TaskTrace], determinism_share: f64) -> PatternAnalysis {
    let sample_count = traces.len() as u64;
    let successful: Vec<&TaskTrace> = traces.iter().filter(|t| t.success).collect();
    let success_count = successful.len() as u64;
    let success_ratio = if sample_count == 0 {
        0.0
    } else {
        success_count as f64 / sample_count as f64
    };

    let mut sequence_counts: HashMap<String, u64> = HashMap::new();
    for trace in &successful {
        let key = trace.tool_sequence.join(",");
        *sequence_counts.entry(key).or_insert(0) += 1;
    }

    let unique_sequences = sequence_counts.len() as u32;
    let (dominant_sequence, dominant_count) = sequence_counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(seq, count)| (Some(seq), count))
        .unwrap_or((None, 0));

    let dominant_share = if success_count == 0 {
        0.0
    } else {
        dominant_count as f64 / success_count as f64
    };
    let deterministic_ratio = if sample_count == 0 {
        0.0
    } else {
        dominant_count as f64 / sample_count as f64
    };

    PatternAnalysis {
        sample_count,
        success_count,
        success_ratio,
        deterministic_ratio,
        dominant_sequence,
        dominant_share,
        unique_sequences,
        is_deterministic: dominant_count > 0 && dominant_share >= determinism_share,
    }
}
