// telemetry-query-rs/src/lib.rs
// Read-only query interface over observability backends.
//
// The learning engine and the self-healing coordinator mine historical
// execution data through this trait; the control plane never writes
// telemetry. Backend-specific protocols (ClickHouse, Jaeger, PromQL, ...)
// live behind implementations of `TelemetryQuery`; this crate ships a
// no-op adapter for environments without a backend and a mock adapter for
// tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};


/// Inclusive time window for queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Window covering the trailing `hours` hours up to now.
    pub fn last_hours(hours: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::hours(hours),
            end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Criteria for span queries.
#[derive(Debug, Clone, Default)]
pub struct SpanFilter {
    /// Restrict to a single task. Empty matches all tasks.
    pub task_name: String,
    /// Restrict to a single agent. Empty matches all agents.
    pub agent: String,
    /// Restrict to a namespace. Empty matches all namespaces.
    pub namespace: String,
    pub time_range: Option<TimeRange>,
    /// Maximum spans to return, newest first. Zero means backend default.
    pub limit: usize,
}

/// Criteria for metric queries.
#[derive(Debug, Clone, Default)]
pub struct MetricFilter {
    pub metric_name: String,
    pub labels: HashMap<String, String>,
    pub time_range: Option<TimeRange>,
    pub limit: usize,
}

/// One execution span as recorded by the tracing backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub task_name: String,
    pub agent: String,
    pub namespace: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Flattened span attributes (tool names, output digests, ...).
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// One metric data point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub metric_name: String,
    pub labels: HashMap<String, String>,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Errors surfaced by telemetry adapters. Callers degrade gracefully on
/// every variant; a broken backend never blocks synthesis or healing.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("telemetry backend unavailable: {0}")]
    Unavailable(String),

    #[error("telemetry query timed out after {0} seconds")]
    Timeout(u64),

    #[error("telemetry backend error: {0}")]
    Backend(String),
}

/// Query interface over an observability backend.
#[async_trait]
pub trait TelemetryQuery: Send + Sync {
    /// Spans matching the filter, newest first, up to `filter.limit`.
    /// An empty result is not an error.
    async fn query_spans(&self, filter: &SpanFilter) -> Result<Vec<Span>, TelemetryError>;

    /// Metric points matching the filter, newest first.
    async fn query_metrics(&self, filter: &MetricFilter)
        -> Result<Vec<MetricPoint>, TelemetryError>;

    /// Lightweight health check. When this returns false callers skip
    /// queries entirely rather than failing hard.
    fn available(&self) -> bool;
}

/// Adapter for deployments without a telemetry backend.
///
/// Reports as unavailable and returns empty results, so learning simply
/// never triggers instead of erroring.
#[derive(Debug, Default)]
pub struct NoOpAdapter;

#[async_trait]
impl TelemetryQuery for NoOpAdapter {
    async fn query_spans(&self, _filter: &SpanFilter) -> Result<Vec<Span>, TelemetryError> {
        Ok(Vec::new())
    }

    async fn query_metrics(
        &self,
        _filter: &MetricFilter,
    ) -> Result<Vec<MetricPoint>, TelemetryError> {
        Ok(Vec::new())
    }

    fn available(&self) -> bool {
        false
    }
}

/// Adapter with pre-configured results, for tests.
#[derive(Debug, Default)]
pub struct MockAdapter {
    pub available: bool,
    pub spans: Vec<Span>,
    pub metrics: Vec<MetricPoint>,
}

impl MockAdapter {
    pub fn with_spans(spans: Vec<Span>) -> Self {
        Self {
            available: true,
            spans,
            metrics: Vec::new(),
        }
    }
}

#[async_trait]
impl TelemetryQuery for MockAdapter {
    async fn query_spans(&self, filter: &SpanFilter) -> Result<Vec<Span>, TelemetryError> {
        let mut out: Vec<Span> = self
            .spans
            .iter()
            .filter(|s| filter.task_name.is_empty() || s.task_name == filter.task_name)
            .filter(|s| filter.agent.is_empty() || s.agent == filter.agent)
            .filter(|s| filter.namespace.is_empty() || s.namespace == filter.namespace)
            .filter(|s| {
                filter
                    .time_range
                    .map(|range| range.contains(s.started_at))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if filter.limit > 0 {
            out.truncate(filter.limit);
        }
        Ok(out)
    }

    async fn query_metrics(
        &self,
        filter: &MetricFilter,
    ) -> Result<Vec<MetricPoint>, TelemetryError> {
        let mut out: Vec<MetricPoint> = self
            .metrics
            .iter()
            .filter(|m| filter.metric_name.is_empty() || m.metric_name == filter.metric_name)
            .filter(|m| {
                filter
                    .labels
                    .iter()
                    .all(|(k, v)| m.labels.get(k).map(|x| x == v).unwrap_or(false))
            })
            .cloned()
            .collect();

        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if filter.limit > 0 {
            out.truncate(filter.limit);
        }
        Ok(out)
    }

    fn available(&self) -> bool {
        self.available
    }
}
