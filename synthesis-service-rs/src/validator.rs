// synthesis-service-rs/src/validator.rs
// Structural validation of generated agent code.
//
// Two layers: a built-in structural checker that always runs (agent block
// present, balanced blocks, task definitions and references, dangerous
// calls in fixed task bodies), and the external grammar validator invoked
// out-of-process with a short timeout. The external validator's absence is
// tolerated: validation degrades to "skipped" rather than blocking
// synthesis in constrained environments such as CI.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::command::{binary_on_path, run_checked, CommandError};

/// Violation severity as reported by validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A single validation finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Finding category ("structure", "task_definition", "security", ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// 1-based line number, 0 when unknown.
    #[serde(default)]
    pub location: u32,
    pub message: String,
    #[serde(default = "Severity::default_error")]
    pub severity: Severity,
}

impl Severity {
    fn default_error() -> Severity {
        Severity::Error
    }
}

impl Violation {
    pub fn error(kind: &str, location: u32, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            location,
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(kind: &str, location: u32, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            location,
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}

/// Result of running a validator over generated code.
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    /// The validator ran; findings (possibly empty) attached.
    Checked(Vec<Violation>),
    /// The validator could not run; synthesis proceeds unvalidated.
    Skipped { reason: String },
}

impl ValidationOutcome {
    pub fn violations(&self) -> &[Violation] {
        match self {
            ValidationOutcome::Checked(v) => v,
            ValidationOutcome::Skipped { .. } => &[],
        }
    }

    pub fn was_skipped(&self) -> bool {
        matches!(self, ValidationOutcome::Skipped { .. })
    }
}

/// Whether any finding should block activation.
pub fn has_blocking_violations(violations: &[Violation]) -> bool {
    violations.iter().any(|v| v.severity == Severity::Error)
}

/// Capability interface over an external code validator.
///
/// Infallible by design: a missing or broken validator yields `Skipped`,
/// and a non-empty violation list is never a hard failure here; the
/// caller decides whether to reject.
#[async_trait]
pub trait CodeValidator: Send + Sync {
    async fn validate(&self, code: &str) -> ValidationOutcome;
}

/// Validator that never runs. For environments without the toolchain.
#[derive(Debug, Default)]
pub struct NoopValidator;

#[async_trait]
impl CodeValidator for NoopValidator {
    async fn validate(&self, _code: &str) -> ValidationOutcome {
        ValidationOutcome::Skipped {
            reason: "validation disabled".to_string(),
        }
    }
}

/// Out-of-process validator backed by the grammar CLI. Code goes in on
/// stdin; violations come back as a JSON array on stdout (exit code 1 is
/// expected when violations are present).
#[derive(Debug, Clone)]
pub struct CommandValidator {
    binary: String,
    timeout: Duration,
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self {
            binary: "loomctl".to_string(),
            // Validation must not become the bottleneck of a synthesis call.
            timeout: Duration::from_secs(1),
        }
    }
}

impl CommandValidator {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CodeValidator for CommandValidator {
    async fn validate(&self, code: &str) -> ValidationOutcome {
        if !binary_on_path(&self.binary) {
            return ValidationOutcome::Skipped {
                reason: format!("{} not found on PATH", self.binary),
            };
        }

        let result = run_checked(
            &self.binary,
            &["validate", "--json", "-"],
            Some(code),
            self.timeout,
        )
        .await;

        let output = match result {
            Ok(output) => output,
            Err(CommandError::Timeout(secs)) => {
                tracing::warn!(secs, "external validation timed out; skipping");
                return ValidationOutcome::Skipped {
                    reason: format!("validator timed out after {secs}s"),
                };
            }
            Err(err) => {
                tracing::warn!(error = %err, "external validation unavailable; skipping");
                return ValidationOutcome::Skipped {
                    reason: err.to_string(),
                };
            }
        };

        if output.stdout.trim().is_empty() {
            if output.success() {
                return ValidationOutcome::Checked(Vec::new());
            }
            tracing::warn!(
                exit_code = ?output.exit_code,
                stderr = %output.stderr,
                "validator failed without reporting violations; skipping"
            );
            return ValidationOutcome::Skipped {
                reason: format!("validator exited with {:?}", output.exit_code),
            };
        }

        match serde_json::from_str::<Vec<Violation>>(&output.stdout) {
            Ok(violations) => ValidationOutcome::Checked(violations),
            Err(err) => {
                tracing::warn!(error = %err, "validator produced invalid output; skipping");
                ValidationOutcome::Skipped {
                    reason: format!("invalid validator output: {err}"),
                }
            }
        }
    }
}

static AGENT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"agent\s+"([^"]+)""#).expect("agent pattern"));
static TASK_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"task\s+:(\w+)").expect("task pattern"));
static TASK_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"run_task\(\s*:(\w+)").expect("task-call pattern"));
static BLOCK_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bdo\b").expect("do pattern"));
static BLOCK_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bend\b").expect("end pattern"));

// Calls that must never appear in fixed (symbolic) task bodies.
const DANGEROUS_CALLS: &[&str] = &[
    "system(", "exec(", "eval(", "fork(", "spawn(", "`", "load(", "require(",
];

/// Built-in structural checks over generated agent code.
///
/// Cheap, dependency-free, and always available, so a missing external
/// validator still leaves a baseline of correctness checking.
#[derive(Debug, Default)]
pub struct StructuralChecker;

impl StructuralChecker {
    pub fn check(&self, code: &str) -> Vec<Violation> {
        let mut violations = Vec::new();

        if code.trim().is_empty() {
            violations.push(Violation::error("structure", 0, "empty code generated"));
            return violations;
        }

        if !AGENT_NAME.is_match(code) {
            violations.push(Violation::error(
                "structure",
                0,
                "code does not contain an agent definition",
            ));
        }

        let opens = BLOCK_OPEN.find_iter(code).count();
        let closes = BLOCK_CLOSE.find_iter(code).count();
        if opens != closes {
            violations.push(Violation::warning(
                "structure",
                0,
                format!("mismatched do/end blocks: {opens} do, {closes} end"),
            ));
        }

        let defined: HashSet<String> = TASK_DEF
            .captures_iter(code)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();

        for (line_idx, line) in code.lines().enumerate() {
            let line_no = (line_idx + 1) as u32;

            // Neural tasks need instructions, symbolic tasks a code block.
            if let Some(caps) = TASK_DEF.captures(line) {
                let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                if !line.contains("instructions:") && !line.contains(" do") {
                    violations.push(Violation::error(
                        "task_definition",
                        line_no,
                        format!(
                            "task '{name}' must have either instructions or a fixed code block"
                        ),
                    ));
                }
            }

            for caps in TASK_CALL.captures_iter(line) {
                if let Some(name) = caps.get(1).map(|m| m.as_str()) {
                    if !defined.contains(name) {
                        violations.push(Violation::error(
                            "task_call",
                            line_no,
                            format!("called task '{name}' is not defined"),
                        ));
                    }
                }
            }

            for pattern in DANGEROUS_CALLS {
                if line.contains(pattern) {
                    violations.push(Violation::error(
                        "security",
                        line_no,
                        format!("code contains forbidden call: {pattern}"),
                    ));
                }
            }
        }

        violations
    }
}
