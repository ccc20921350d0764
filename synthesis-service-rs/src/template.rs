// synthesis-service-rs/src/template.rs
// Deterministic fallback code generation.
//
// When the generator is unavailable, times out, or replies without a
// parseable code block, synthesis falls back to this model-free template:
// a structurally valid agent definition built purely from the request.
// The result is a runnable baseline, not a clever one: one task per
// available tool, executed in order.

use crate::intent::TemporalIntent;
use crate::synthesizer::SynthesisRequest;

/// Make text safe for a double-quoted DSL string on one line.
fn sanitize_text(text: &str, max_len: usize) -> String {
    let mut out: String = text
        .replace(['\n', '\r'], " ")
        .replace('"', "'")
        .trim()
        .to_string();
    if out.len() > max_len {
        let mut end = max_len;
        while end > 0 && !out.is_char_boundary(end) {
            end -= 1;
        }
        out.truncate(end);
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
        out.push_str("...");
    }
    out
}

/// Derive a DSL identifier from a tool name ("google-sheets" -> "use_google_sheets").
fn task_identifier(tool: &str) -> String {
    let cleaned: String = tool
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("use_{}", cleaned.trim_matches('_'))
}

/// Split instructions into up to three objective sentences.
fn objectives_from(instructions: &str) -> Vec<String> {
    let parts: Vec<String> = instructions
        .split(['.', ';', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(3)
        .map(|s| sanitize_text(s, 100))
        .collect();

    if parts.is_empty() {
        vec![sanitize_text(instructions, 100)]
    } else {
        parts
    }
}

/// Generate baseline agent code without a model call.
pub fn generate_fallback_code(
    req: &SynthesisRequest,
    intent: TemporalIntent,
    schedule: Option<&str>,
) -> String {
    let mut code = String::new();

    code.push_str(&format!("agent \"{}\" do\n", req.agent_name));
    code.push_str(&format!(
        "  description \"{}\"\n",
        sanitize_text(&req.instructions, 120)
    ));

    if intent == TemporalIntent::Scheduled {
        if let Some(cron) = schedule {
            code.push_str(&format!("  schedule \"{cron}\"\n"));
        }
    }

    code.push('\n');
    code.push_str("  constraints do\n");
    match intent {
        TemporalIntent::OneShot => code.push_str("    max_iterations 10\n"),
        _ => code.push_str("    max_iterations 999999\n"),
    }
    code.push_str("    timeout \"10m\"\n");
    code.push_str("  end\n");

    if !req.tools.is_empty() {
        let quoted: Vec<String> = req.tools.iter().map(|t| format!("\"{t}\"")).collect();
        code.push_str(&format!("\n  tools [{}]\n", quoted.join(", ")));
    }

    code.push_str("\n  objectives [\n");
    let objectives = objectives_from(&req.instructions);
    for (i, objective) in objectives.iter().enumerate() {
        let comma = if i + 1 < objectives.len() { "," } else { "" };
        code.push_str(&format!("    \"{objective}\"{comma}\n"));
    }
    code.push_str("  ]\n\n");

    let instructions_line = sanitize_text(&req.instructions, 120);
    let mut task_names: Vec<String> = Vec::new();

    if req.tools.is_empty() {
        let name = "carry_out_instructions".to_string();
        code.push_str(&format!(
            "  task :{name}, instructions: \"{instructions_line}\"\n"
        ));
        task_names.push(name);
    } else {
        for tool in &req.tools {
            let name = task_identifier(tool);
            code.push_str(&format!(
                "  task :{name}, instructions: \"Use the {tool} tool to make progress on: \
                 {instructions_line}\", tools: [\"{tool}\"]\n"
            ));
            task_names.push(name);
        }
    }

    code.push_str("\n  main do\n");
    let mut last_var = String::new();
    for (i, name) in task_names.iter().enumerate() {
        last_var = format!("step_{}", i + 1);
        code.push_str(&format!("    {last_var} = run_task(:{name})\n"));
    }
    code.push_str(&format!("    {last_var}\n"));
    code.push_str("  end\n");
    code.push_str("end\n");

    code
}
