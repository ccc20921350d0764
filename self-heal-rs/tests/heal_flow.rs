// End-to-end healing flows: failure threshold, re-synthesis, cooldown,
// attempt exhaustion and rollback to last-known-good code.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use code_store::{CodeSource, InMemoryVersionStore, TaskRef, VersionStore};
use self_heal::{
    HealOutcome, HealState, RuntimeErrorRecord, SelfHealConfig, SelfHealingCoordinator,
};
use synthesis::{AgentSynthesizer, SynthesisError, SynthesisRequest, SynthesisResponse};
use tokio::sync::Mutex;

/// Synthesizer double that replays scripted results; repeats the last one
/// when the script runs dry.
struct ScriptedSynthesizer {
    script: Mutex<VecDeque<Result<String, String>>>,
    last: Mutex<Option<Result<String, String>>>,
}

impl ScriptedSynthesizer {
    fn new(script: Vec<Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
        }
    }

    fn always_ok(code: &str) -> Self {
        Self::new(vec![Ok(code.to_string())])
    }

    fn always_failing() -> Self {
        Self::new(vec![Err("generator exploded".to_string())])
    }
}

#[async_trait]
impl AgentSynthesizer for ScriptedSynthesizer {
    async fn synthesize_agent(
        &self,
        _req: &SynthesisRequest,
    ) -> Result<SynthesisResponse, SynthesisError> {
        let next = {
            let mut script = self.script.lock().await;
            script.pop_front()
        };
        let entry = match next {
            Some(entry) => {
                *self.last.lock().await = Some(entry.clone());
                entry
            }
            None => self
                .last
                .lock()
                .await
                .clone()
                .unwrap_or(Err("script exhausted".to_string())),
        };

        match entry {
            Ok(code) => Ok(SynthesisResponse {
                code,
                violations: Vec::new(),
                error: None,
                duration: Duration::from_millis(5),
                cost: None,
                schema_version: None,
                used_fallback: false,
            }),
            Err(msg) => Err(SynthesisError::GeneratorFailure(msg)),
        }
    }
}

fn task() -> TaskRef {
    TaskRef::new("reporter", "default")
}

fn base_request() -> SynthesisRequest {
    SynthesisRequest::new(
        "post a daily report",
        vec!["http".to_string()],
        vec!["gpt-4o-mini".to_string()],
        "reporter",
        "default",
    )
}

fn failure(n: u32) -> RuntimeErrorRecord {
    RuntimeErrorRecord::from_message(format!("connection refused (failure {n})"), Some(1), 1)
}

fn quick_config(max_attempts: u32) -> SelfHealConfig {
    SelfHealConfig {
        failure_threshold: 3,
        cooldown: Duration::from_secs(0),
        max_resynthesis_attempts: max_attempts,
        max_error_records: 10,
    }
}

#[tokio::test]
async fn threshold_is_reached_exactly_once_and_resynthesis_recovers() {
    let store = Arc::new(InMemoryVersionStore::new());
    let coordinator = SelfHealingCoordinator::new(
        Arc::new(ScriptedSynthesizer::always_ok("agent \"reporter\" do\nend\n")),
        store.clone(),
        quick_config(3),
    );
    let task = task();
    let req = base_request();

    // Below the threshold failures are only recorded.
    for n in 1..=2 {
        let outcome = coordinator
            .report_runtime_failure(&task, &req, failure(n))
            .await
            .expect("report");
        assert_eq!(outcome, HealOutcome::Recorded { consecutive_failures: n });
        assert_eq!(coordinator.state(&task).await, Some(HealState::Healthy));
    }

    // The third consecutive failure crosses the threshold and triggers a
    // successful re-synthesis.
    let outcome = coordinator
        .report_runtime_failure(&task, &req, failure(3))
        .await
        .expect("report");
    assert_eq!(outcome, HealOutcome::Resynthesized { version: 1 });
    assert_eq!(coordinator.state(&task).await, Some(HealState::Healthy));

    let active = store.active(&task).await.expect("query").expect("active");
    assert_eq!(active.source, CodeSource::SelfHeal);
}

#[tokio::test]
async fn success_resets_the_failure_streak() {
    let store = Arc::new(InMemoryVersionStore::new());
    store
        .put_active(&task(), "agent \"reporter\" do\nend\n", CodeSource::InitialSynthesis)
        .await
        .expect("seed version");

    let coordinator = SelfHealingCoordinator::new(
        Arc::new(ScriptedSynthesizer::always_failing()),
        store,
        quick_config(3),
    );
    let task = task();
    let req = base_request();

    coordinator
        .report_runtime_failure(&task, &req, failure(1))
        .await
        .expect("report");
    coordinator
        .report_runtime_failure(&task, &req, failure(2))
        .await
        .expect("report");
    coordinator.record_success(&task).await.expect("success");
    assert_eq!(coordinator.state(&task).await, Some(HealState::Healthy));

    // The streak starts over: two more failures stay below the threshold.
    let outcome = coordinator
        .report_runtime_failure(&task, &req, failure(3))
        .await
        .expect("report");
    assert_eq!(outcome, HealOutcome::Recorded { consecutive_failures: 1 });
}

#[tokio::test]
async fn cooldown_blocks_back_to_back_resynthesis() {
    let store = Arc::new(InMemoryVersionStore::new());
    let coordinator = SelfHealingCoordinator::new(
        Arc::new(ScriptedSynthesizer::always_failing()),
        store,
        SelfHealConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(300),
            max_resynthesis_attempts: 3,
            max_error_records: 10,
        },
    );
    let task = task();
    let req = base_request();

    for n in 1..=2 {
        coordinator
            .report_runtime_failure(&task, &req, failure(n))
            .await
            .expect("report");
    }
    let outcome = coordinator
        .report_runtime_failure(&task, &req, failure(3))
        .await
        .expect("report");
    assert_eq!(outcome, HealOutcome::ResynthesisFailed { attempts: 1 });

    // Immediately after a failed attempt the cooldown gates the next one.
    let outcome = coordinator
        .report_runtime_failure(&task, &req, failure(4))
        .await
        .expect("report");
    assert!(matches!(outcome, HealOutcome::CoolingDown { remaining } if remaining > Duration::ZERO));
}

#[tokio::test]
async fn exhausted_attempts_roll_back_to_last_known_good() {
    let store = Arc::new(InMemoryVersionStore::new());
    let task = task();

    // Version 1 ran successfully in the past; version 2 is the bad deploy.
    store
        .put_active(&task, "agent \"reporter\" do\nend\n", CodeSource::InitialSynthesis)
        .await
        .expect("v1");
    store.mark_known_good(&task).await.expect("pin v1");
    store
        .put_active(&task, "agent \"reporter\" do\nbroken\nend\n", CodeSource::SelfHeal)
        .await
        .expect("v2");

    let coordinator = SelfHealingCoordinator::new(
        Arc::new(ScriptedSynthesizer::always_failing()),
        store.clone(),
        quick_config(1),
    );
    let req = base_request();

    for n in 1..=2 {
        coordinator
            .report_runtime_failure(&task, &req, failure(n))
            .await
            .expect("report");
    }

    // Third failure: threshold reached, the single allowed attempt fails,
    // and the coordinator rolls back to the pinned version.
    let outcome = coordinator
        .report_runtime_failure(&task, &req, failure(3))
        .await
        .expect("report");
    assert_eq!(outcome, HealOutcome::RolledBack { version: Some(1) });
    assert_eq!(coordinator.state(&task).await, Some(HealState::RolledBack));

    let active = store.active(&task).await.expect("query").expect("active");
    assert_eq!(active.version, 1, "previously-good version must be active");

    // Further reports are ignored until a manual reset.
    let outcome = coordinator
        .report_runtime_failure(&task, &req, failure(4))
        .await
        .expect("report");
    assert_eq!(outcome, HealOutcome::Halted);

    coordinator.manual_reset(&task).await;
    assert_eq!(coordinator.state(&task).await, Some(HealState::Healthy));
}

#[tokio::test]
async fn rollback_without_known_good_version_reports_none() {
    let store = Arc::new(InMemoryVersionStore::new());
    let coordinator = SelfHealingCoordinator::new(
        Arc::new(ScriptedSynthesizer::always_failing()),
        store,
        quick_config(1),
    );
    let task = task();
    let req = base_request();

    for n in 1..=2 {
        coordinator
            .report_runtime_failure(&task, &req, failure(n))
            .await
            .expect("report");
    }
    let outcome = coordinator
        .report_runtime_failure(&task, &req, failure(3))
        .await
        .expect("report");
    assert_eq!(outcome, HealOutcome::RolledBack { version: None });
}

#[tokio::test]
async fn error_history_is_bounded() {
    let store = Arc::new(InMemoryVersionStore::new());
    let coordinator = SelfHealingCoordinator::new(
        Arc::new(ScriptedSynthesizer::always_ok("agent \"reporter\" do\nend\n")),
        store,
        SelfHealConfig {
            failure_threshold: 100,
            cooldown: Duration::from_secs(0),
            max_resynthesis_attempts: 3,
            max_error_records: 5,
        },
    );
    let task = task();
    let req = base_request();

    for n in 1..=8 {
        coordinator
            .report_runtime_failure(&task, &req, failure(n))
            .await
            .expect("report");
    }

    let errors = coordinator.recent_errors(&task).await;
    assert_eq!(errors.len(), 5, "retention keeps the most recent N records");
    assert!(errors[0].message.contains("failure 4"));
    assert!(errors[4].message.contains("failure 8"));
}
