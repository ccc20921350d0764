// synthesis-service-rs/src/prompt.rs
// Structured prompt assembly for agent code synthesis.

use crate::intent::TemporalIntent;
use crate::synthesizer::SynthesisRequest;

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "None".to_string();
    }
    items
        .iter()
        .map(|i| format!("  - {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the synthesis prompt for the language model.
///
/// Embeds the instructions, available tools and models, the detected
/// temporal intent, an optional persona, and (for self-heal retries and
/// learning rewrites) the failure or pattern context the model should
/// react to.
pub(crate) fn build_synthesis_prompt(
    req: &SynthesisRequest,
    intent: TemporalIntent,
    schedule: Option<&str>,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are generating agent definition code for an autonomous task runner.\n\
         Respond with exactly one fenced code block containing the agent definition \
         and nothing else.\n\n",
    );

    prompt.push_str(&format!("**User instructions:**\n{}\n\n", req.instructions));
    prompt.push_str(&format!("**Available tools:**\n{}\n\n", bullet_list(&req.tools)));
    prompt.push_str(&format!("**Available models:**\n{}\n\n", bullet_list(&req.models)));
    prompt.push_str(&format!("**Agent name:** {}\n\n", req.agent_name));
    prompt.push_str(&format!("**Detected temporal intent:** {intent}\n\n"));

    if let Some(persona) = &req.persona {
        prompt.push_str(&format!("**Persona (system behavior):**\n{persona}\n\n"));
    }

    if let Some(rewrite) = &req.rewrite {
        prompt.push_str(&format!(
            "**Rewrite request:**\nTask `{}` has behaved deterministically across {} recorded \
             executions (success ratio {:.2}). Replace its model-backed definition with fixed \
             code that implements the observed behavior directly, without a model call at \
             execution time. Observed pattern:\n{}\nKeep the task's inputs and outputs \
             unchanged.\n\n",
            rewrite.task_name, rewrite.trace_count, rewrite.success_ratio, rewrite.observed_pattern
        ));
    }

    if let Some(ctx) = &req.error_context {
        prompt.push_str(&format!(
            "**Failure context (attempt {}, previous attempts: {}):**\n\
             The currently deployed code has failed {} consecutive times.\n",
            req.attempt_number, ctx.previous_attempts, ctx.consecutive_failures
        ));
        for (i, err) in ctx.runtime_errors.iter().take(5).enumerate() {
            prompt.push_str(&format!(
                "Failure {} (at {}): [{}] {}",
                i + 1,
                err.timestamp,
                err.error_type,
                err.error_message
            ));
            if let Some(code) = err.exit_code {
                prompt.push_str(&format!(" (exit code {code})"));
            }
            prompt.push('\n');
        }
        for v in ctx.validation_errors.iter().take(5) {
            prompt.push_str(&format!("Validation: {v}\n"));
        }
        if !ctx.last_crash_log.is_empty() {
            prompt.push_str(&format!("Last crash log:\n{}\n", ctx.last_crash_log));
        }
        prompt.push_str(
            "Analyze these failures and generate a more robust implementation: add error \
             handling, input validation, timeouts or alternative approaches as appropriate.\n\n",
        );
        if let Some(good) = &req.last_known_good_code {
            prompt.push_str(&format!(
                "**Last known good code (for reference):**\n```\n{good}\n```\n\n"
            ));
        }
    }

    prompt.push_str("Generate the agent definition in this exact shape:\n\n```\n");
    prompt.push_str(&format!("agent \"{}\" do\n", req.agent_name));
    prompt.push_str("  description \"Brief description extracted from the instructions\"\n");
    if let Some(cron) = schedule {
        prompt.push_str(&format!("  schedule \"{cron}\"\n"));
    }
    prompt.push_str(
        "\n  constraints do\n    max_iterations 999999\n    timeout \"10m\"\n  end\n\n\
         tools [\"tool-a\", \"tool-b\"]\n\n\
         objectives [\n    \"First objective\",\n    \"Second objective\"\n  ]\n\n\
         task :step_name, instructions: \"What this step should accomplish\", tools: [\"tool-a\"]\n\n\
         main do\n    result = run_task(:step_name)\n    result\n  end\nend\n```\n\n",
    );

    prompt.push_str("**Rules:**\n");
    prompt.push_str("1. Output ONLY the code block, no explanations before or after.\n");
    match intent {
        TemporalIntent::OneShot => {
            prompt.push_str(
                "2. One-shot execution detected: use bounded max_iterations and do NOT \
                 include a schedule line.\n",
            );
        }
        TemporalIntent::Scheduled => {
            prompt.push_str(&format!(
                "2. Scheduled execution detected: include `schedule \"{}\"`.\n",
                schedule.unwrap_or("0 0 * * *")
            ));
        }
        TemporalIntent::Continuous => {
            prompt.push_str(
                "2. No temporal intent detected: continuous execution, no schedule line.\n",
            );
        }
    }
    prompt.push_str("3. Break the instructions into clear, actionable objectives.\n");
    prompt.push_str("4. Reference only the listed tools.\n");
    prompt.push_str(&format!("5. Use the agent name \"{}\".\n\n", req.agent_name));
    prompt.push_str("Generate the code now:");

    prompt
}
