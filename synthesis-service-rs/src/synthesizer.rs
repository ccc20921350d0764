// synthesis-service-rs/src/synthesizer.rs
// Agent code synthesis orchestration.
//
// The synthesizer owns prompt construction, the bounded model call, code
// extraction, the deterministic fallback, validation and cost stamping.
// It performs no persistence: the caller owns storage and activation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use model_client::{ChatMessage, ChatModel};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::cost_tracker::{estimate_tokens, CostTracker, SynthesisCost};
use crate::intent::{detect_temporal_intent, schedule_expression};
use crate::metrics::{observe_synthesis_duration, record_fallback, record_synthesis_attempt};
use crate::prompt::build_synthesis_prompt;
use crate::schema::SchemaClient;
use crate::template::generate_fallback_code;
use crate::validator::{CodeValidator, StructuralChecker, Violation};
use crate::{Result, SynthesisError};

/// A runtime failure summarized for the re-synthesis prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeErrorSummary {
    pub timestamp: String,
    pub error_type: String,
    pub error_message: String,
    pub exit_code: Option<i32>,
    pub synthesis_attempt: u32,
}

/// Failure context embedded in self-heal retries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    pub runtime_errors: Vec<RuntimeErrorSummary>,
    pub validation_errors: Vec<String>,
    pub last_crash_log: String,
    pub consecutive_failures: u32,
    pub previous_attempts: u32,
}

/// Context for learning-driven rewrites of a single task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteContext {
    pub task_name: String,
    pub observed_pattern: String,
    pub trace_count: u64,
    pub success_ratio: f64,
}

/// Everything needed to synthesize an agent. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub instructions: String,
    pub tools: Vec<String>,
    pub models: Vec<String>,
    pub agent_name: String,
    pub namespace: String,
    pub persona: Option<String>,
    pub error_context: Option<ErrorContext>,
    pub rewrite: Option<RewriteContext>,
    pub is_retry: bool,
    pub attempt_number: u32,
    pub last_known_good_code: Option<String>,
}

impl SynthesisRequest {
    pub fn new(
        instructions: impl Into<String>,
        tools: Vec<String>,
        models: Vec<String>,
        agent_name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            instructions: instructions.into(),
            tools,
            models,
            agent_name: agent_name.into(),
            namespace: namespace.into(),
            persona: None,
            error_context: None,
            rewrite: None,
            is_retry: false,
            attempt_number: 0,
            last_known_good_code: None,
        }
    }
}

/// Result of one synthesis attempt. Superseded by each new attempt.
#[derive(Debug, Clone)]
pub struct SynthesisResponse {
    pub code: String,
    pub violations: Vec<Violation>,
    /// Generator error recovered via fallback, if any.
    pub error: Option<String>,
    pub duration: Duration,
    /// Cost of the model call, when one completed (charged even if the
    /// reply was unusable and the fallback produced the code).
    pub cost: Option<SynthesisCost>,
    /// Grammar version in effect during validation, when known.
    pub schema_version: Option<String>,
    pub used_fallback: bool,
}

/// Synthesizer settings.
#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    /// Deadline for a single generation call.
    pub generation_timeout: Duration,
    /// Expected reply size, used for cost estimation.
    pub expected_output_tokens: u64,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(60),
            expected_output_tokens: 800,
        }
    }
}

/// Interface for synthesizing agent code, the seam the self-healing
/// coordinator and the learning engine program against.
#[async_trait]
pub trait AgentSynthesizer: Send + Sync {
    async fn synthesize_agent(&self, req: &SynthesisRequest) -> Result<SynthesisResponse>;
}

/// Generates agent DSL code from natural-language instructions.
pub struct Synthesizer {
    model: Arc<dyn ChatModel>,
    validator: Arc<dyn CodeValidator>,
    schema: Arc<SchemaClient>,
    structural: StructuralChecker,
    cost_tracker: CostTracker,
    config: SynthesizerConfig,
}

impl Synthesizer {
    pub fn new(
        model: Arc<dyn ChatModel>,
        validator: Arc<dyn CodeValidator>,
        schema: Arc<SchemaClient>,
        cost_tracker: CostTracker,
        config: SynthesizerConfig,
    ) -> Self {
        Self {
            model,
            validator,
            schema,
            structural: StructuralChecker,
            cost_tracker,
            config,
        }
    }

    /// Predict the cost of synthesizing `req` before any external call.
    pub fn estimate_request_cost(&self, req: &SynthesisRequest) -> SynthesisCost {
        let intent = detect_temporal_intent(&req.instructions);
        let schedule = schedule_expression(&req.instructions);
        let prompt = build_synthesis_prompt(req, intent, schedule.as_deref());
        self.cost_tracker.estimate_cost(
            &prompt,
            self.config.expected_output_tokens,
            self.model.model_name(),
        )
    }
}

/// Extract code from a markdown reply. Fenced blocks win; a bare reply is
/// accepted only when it already looks like an agent definition.
pub(crate) fn extract_code_from_markdown(content: &str) -> Option<String> {
    let content = content.trim();

    if let Some(start) = content.find("```") {
        let after_fence = &content[start + 3..];
        // Skip an optional language tag on the fence line.
        let code_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[code_start..];
        let code = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
        let code = code.trim();
        if code.is_empty() {
            return None;
        }
        return Some(code.to_string());
    }

    if content.contains("agent \"") {
        return Some(content.to_string());
    }
    None
}

#[async_trait]
impl AgentSynthesizer for Synthesizer {
    #[instrument(
        name = "synthesize_agent",
        skip(self, req),
        fields(agent = %req.agent_name, namespace = %req.namespace)
    )]
    async fn synthesize_agent(&self, req: &SynthesisRequest) -> Result<SynthesisResponse> {
        let started = Instant::now();

        if req.instructions.trim().is_empty() {
            record_synthesis_attempt(&req.namespace, "rejected");
            return Err(SynthesisError::EmptyInstructions);
        }

        let intent = detect_temporal_intent(&req.instructions);
        let schedule = schedule_expression(&req.instructions);
        let prompt = build_synthesis_prompt(req, intent, schedule.as_deref());

        tracing::info!(
            tools = req.tools.len(),
            models = req.models.len(),
            intent = %intent,
            retry = req.is_retry,
            "synthesizing agent code"
        );

        let messages = [ChatMessage::user(prompt.clone())];
        let mut generator_error: Option<String> = None;
        let mut cost: Option<SynthesisCost> = None;

        let generated =
            match tokio::time::timeout(self.config.generation_timeout, self.model.generate(&messages))
                .await
            {
                Ok(Ok(reply)) => {
                    cost = Some(self.cost_tracker.calculate_cost(
                        estimate_tokens(&prompt),
                        estimate_tokens(&reply.content),
                        self.model.model_name(),
                    ));
                    match extract_code_from_markdown(&reply.content) {
                        Some(code) => Some(code),
                        None => {
                            generator_error =
                                Some("no code block found in model reply".to_string());
                            None
                        }
                    }
                }
                Ok(Err(err)) => {
                    generator_error = Some(err.to_string());
                    None
                }
                Err(_) => {
                    generator_error = Some(format!(
                        "generation timed out after {} seconds",
                        self.config.generation_timeout.as_secs()
                    ));
                    None
                }
            };

        let (code, used_fallback) = match generated {
            Some(code) => (code, false),
            None => {
                // The deterministic template guarantees a runnable baseline
                // whenever the generator misbehaves.
                let reason = generator_error.as_deref().unwrap_or("unknown");
                tracing::warn!(reason, "generator failed, using deterministic fallback");
                record_fallback(&req.namespace);
                (generate_fallback_code(req, intent, schedule.as_deref()), true)
            }
        };

        let mut violations = self.structural.check(&code);
        let outcome = self.validator.validate(&code).await;
        if outcome.was_skipped() {
            tracing::debug!("external validation skipped");
        }
        violations.extend_from_slice(outcome.violations());

        let schema_version = match self.schema.fetch_version().await {
            Ok(version) => Some(version),
            Err(err) => {
                tracing::debug!(error = %err, "schema version unavailable");
                None
            }
        };

        let duration = started.elapsed();
        observe_synthesis_duration(duration.as_secs_f64());
        record_synthesis_attempt(
            &req.namespace,
            if violations.is_empty() { "success" } else { "violations" },
        );

        tracing::info!(
            code_len = code.len(),
            violations = violations.len(),
            used_fallback,
            duration_secs = duration.as_secs_f64(),
            "agent code synthesized"
        );

        Ok(SynthesisResponse {
            code,
            violations,
            error: generator_error,
            duration,
            cost,
            schema_version,
            used_fallback,
        })
    }
}
