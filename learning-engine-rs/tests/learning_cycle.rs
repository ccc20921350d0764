// End-to-end learning cycles: confidence gating, cooldown enforcement,
// rewrite storage and retention, graceful degradation without telemetry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use code_store::{CodeSource, InMemoryVersionStore, TaskRef, VersionStore};
use learning_engine::{
    LearningCandidate, LearningConfig, LearningEngine, SampleSaturatingConfidence,
};
use synthesis::{AgentSynthesizer, SynthesisError, SynthesisRequest, SynthesisResponse};
use telemetry_query::{MockAdapter, NoOpAdapter, Span};

struct FixedSynthesizer {
    reply: Result<String, String>,
}

#[async_trait]
impl AgentSynthesizer for FixedSynthesizer {
    async fn synthesize_agent(
        &self,
        _req: &SynthesisRequest,
    ) -> Result<SynthesisResponse, SynthesisError> {
        match &self.reply {
            Ok(code) => Ok(SynthesisResponse {
                code: code.clone(),
                violations: Vec::new(),
                error: None,
                duration: Duration::from_millis(3),
                cost: None,
                schema_version: None,
                used_fallback: false,
            }),
            Err(msg) => Err(SynthesisError::GeneratorFailure(msg.clone())),
        }
    }
}

fn span(task: &str, minutes_ago: i64, success: bool, tools: &str) -> Span {
    let mut attributes = HashMap::new();
    attributes.insert("tools".to_string(), tools.to_string());
    Span {
        trace_id: format!("trace-{minutes_ago}"),
        span_id: format!("span-{minutes_ago}"),
        task_name: task.to_string(),
        agent: "reporter".to_string(),
        namespace: "default".to_string(),
        started_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
        duration_ms: 50,
        success,
        error_message: if success { None } else { Some("boom".to_string()) },
        attributes,
    }
}

fn candidate() -> LearningCandidate {
    LearningCandidate {
        task: TaskRef::new("summarize", "default"),
        request: SynthesisRequest::new(
            "summarize the sheet",
            vec!["sheets".to_string(), "email".to_string()],
            vec!["gpt-4o-mini".to_string()],
            "reporter",
            "default",
        ),
    }
}

fn engine(
    spans: Vec<Span>,
    synthesizer: FixedSynthesizer,
    store: Arc<InMemoryVersionStore>,
    config: LearningConfig,
) -> LearningEngine {
    LearningEngine::new(
        Arc::new(MockAdapter::with_spans(spans)),
        Arc::new(synthesizer),
        store,
        Arc::new(SampleSaturatingConfidence::default()),
        config,
    )
}

fn deterministic_spans(n: usize) -> Vec<Span> {
    (0..n)
        .map(|i| span("summarize", i as i64 + 1, true, "sheets,email"))
        .collect()
}

#[tokio::test]
async fn deterministic_history_triggers_a_stored_rewrite() {
    let store = Arc::new(InMemoryVersionStore::new());
    let engine = engine(
        deterministic_spans(12),
        FixedSynthesizer {
            reply: Ok("agent \"reporter\" do\nend\n".to_string()),
        },
        store.clone(),
        LearningConfig::default(),
    );

    let report = engine.run_learning_cycle(&[candidate()]).await;

    assert!(report.telemetry_available);
    assert_eq!(report.rewrites_applied, 1);
    assert_eq!(report.rewrites_failed, 0);
    assert!(report.estimated_daily_savings > 0.0);

    let task = TaskRef::new("summarize", "default");
    let active = store.active(&task).await.expect("query").expect("active");
    assert_eq!(active.source, CodeSource::LearningRewrite);

    let status = engine.task_status(&task).await.expect("status");
    assert!(status.is_symbolic);
    assert_eq!(status.trace_count, 12);
    let confidence = status.confidence.expect("confidence recorded");
    assert!(confidence.confidence >= 0.8);
}

#[tokio::test]
async fn rewritten_tasks_are_skipped_in_later_cycles() {
    let store = Arc::new(InMemoryVersionStore::new());
    let engine = engine(
        deterministic_spans(12),
        FixedSynthesizer {
            reply: Ok("agent \"reporter\" do\nend\n".to_string()),
        },
        store,
        LearningConfig::default(),
    );

    engine.run_learning_cycle(&[candidate()]).await;
    let second = engine.run_learning_cycle(&[candidate()]).await;

    assert_eq!(second.rewrites_applied, 0);
    assert_eq!(second.tasks_skipped_symbolic, 1);
}

#[tokio::test]
async fn cooldown_suppresses_retries_even_at_high_confidence() {
    let store = Arc::new(InMemoryVersionStore::new());
    let engine = engine(
        deterministic_spans(12),
        FixedSynthesizer {
            reply: Err("generator down".to_string()),
        },
        store,
        LearningConfig {
            cooldown: Duration::from_secs(600),
            ..Default::default()
        },
    );

    let first = engine.run_learning_cycle(&[candidate()]).await;
    assert_eq!(first.rewrites_failed, 1);

    // Confidence is still above the bar, but the failed attempt armed the
    // cooldown: no second rewrite attempt may fire.
    let second = engine.run_learning_cycle(&[candidate()]).await;
    assert_eq!(second.rewrites_failed, 0);
    assert_eq!(second.rewrites_applied, 0);
    assert_eq!(second.cooldown_blocked, 1);
}

#[tokio::test]
async fn failed_rewrite_keeps_current_code_active() {
    let store = Arc::new(InMemoryVersionStore::new());
    let task = TaskRef::new("summarize", "default");
    store
        .put_active(&task, "agent \"reporter\" do\nend\n", CodeSource::InitialSynthesis)
        .await
        .expect("seed");

    let engine = engine(
        deterministic_spans(12),
        FixedSynthesizer {
            reply: Err("generator down".to_string()),
        },
        store.clone(),
        LearningConfig::default(),
    );

    let report = engine.run_learning_cycle(&[candidate()]).await;
    assert_eq!(report.rewrites_failed, 1);

    let active = store.active(&task).await.expect("query").expect("active");
    assert_eq!(active.version, 1, "failed rewrite must not deactivate current code");
    assert_eq!(active.source, CodeSource::InitialSynthesis);
}

#[tokio::test]
async fn too_few_executions_never_trigger() {
    let store = Arc::new(InMemoryVersionStore::new());
    let engine = engine(
        deterministic_spans(5),
        FixedSynthesizer {
            reply: Ok("agent \"reporter\" do\nend\n".to_string()),
        },
        store,
        LearningConfig::default(),
    );

    let report = engine.run_learning_cycle(&[candidate()]).await;
    assert_eq!(report.tasks_below_minimum, 1);
    assert_eq!(report.rewrites_applied, 0);
}

#[tokio::test]
async fn scattered_behavior_stays_neural() {
    let spans: Vec<Span> = (0..12)
        .map(|i| {
            let tools = if i % 2 == 0 { "sheets,email" } else { "email,sheets" };
            span("summarize", i + 1, true, tools)
        })
        .collect();

    let store = Arc::new(InMemoryVersionStore::new());
    let engine = engine(
        spans,
        FixedSynthesizer {
            reply: Ok("agent \"reporter\" do\nend\n".to_string()),
        },
        store.clone(),
        LearningConfig::default(),
    );

    let report = engine.run_learning_cycle(&[candidate()]).await;
    assert_eq!(report.rewrites_applied, 0);

    let task = TaskRef::new("summarize", "default");
    assert!(store.active(&task).await.expect("query").is_none());
}

#[tokio::test]
async fn high_error_rate_with_moderate_confidence_triggers_recovery() {
    // 14 of 20 executions succeed with one stable sequence: too unreliable
    // for a pattern rewrite, unstable enough for error recovery.
    let mut spans = Vec::new();
    for i in 0..14 {
        spans.push(span("summarize", i + 1, true, "sheets,email"));
    }
    for i in 14..20 {
        spans.push(span("summarize", i + 1, false, "sheets"));
    }

    let store = Arc::new(InMemoryVersionStore::new());
    let engine = engine(
        spans,
        FixedSynthesizer {
            reply: Ok("agent \"reporter\" do\nend\n".to_string()),
        },
        store,
        LearningConfig::default(),
    );

    let report = engine.run_learning_cycle(&[candidate()]).await;
    assert_eq!(report.rewrites_applied, 1);
}

#[tokio::test]
async fn missing_telemetry_backend_degrades_gracefully() {
    let engine = LearningEngine::new(
        Arc::new(NoOpAdapter),
        Arc::new(FixedSynthesizer {
            reply: Ok("agent \"reporter\" do\nend\n".to_string()),
        }),
        Arc::new(InMemoryVersionStore::new()),
        Arc::new(SampleSaturatingConfidence::default()),
        LearningConfig::default(),
    );

    let report = engine.run_learning_cycle(&[candidate()]).await;
    assert!(!report.telemetry_available);
    assert_eq!(report.tasks_scanned, 0);
    assert_eq!(report.rewrites_applied, 0);
}

#[tokio::test]
async fn retention_bounds_version_history_after_rewrites() {
    let store = Arc::new(InMemoryVersionStore::new());
    let task = TaskRef::new("summarize", "default");
    for i in 0..6 {
        store
            .put_active(&task, &format!("agent \"reporter\" do\n# v{i}\nend\n"), {
                if i == 0 {
                    CodeSource::InitialSynthesis
                } else {
                    CodeSource::SelfHeal
                }
            })
            .await
            .expect("seed");
    }

    let engine = engine(
        deterministic_spans(12),
        FixedSynthesizer {
            reply: Ok("agent \"reporter\" do\nend\n".to_string()),
        },
        store.clone(),
        LearningConfig::default(),
    );

    let report = engine.run_learning_cycle(&[candidate()]).await;
    assert_eq!(report.rewrites_applied, 1);

    let history = store.list(&task).await.expect("list");
    let versions: Vec<u32> = history.iter().map(|v| v.version).collect();

    // Last five plus the always-kept initial version.
    assert!(versions.len() <= 6);
    assert!(versions.contains(&1), "initial version preserved");
    assert!(versions.contains(&7), "new rewrite present");
    let active = store.active(&task).await.expect("query").expect("active");
    assert_eq!(active.version, 7);
}
