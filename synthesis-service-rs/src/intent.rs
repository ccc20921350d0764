// synthesis-service-rs/src/intent.rs
// Temporal-intent detection and schedule extraction from instructions.
//
// Classification is keyword-driven: one-shot indicators win over schedule
// indicators, and everything else defaults to continuous execution (agents
// like "provides fun facts" run until told otherwise). Schedule phrases
// are mapped to cron expressions here, deterministically, so the fallback
// template can honor schedules without a model call.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Detected execution pattern for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemporalIntent {
    /// Run once or a limited number of times.
    OneShot,
    /// Run on a cron schedule.
    Scheduled,
    /// Run indefinitely.
    Continuous,
}

impl std::fmt::Display for TemporalIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TemporalIntent::OneShot => "one-shot",
            TemporalIntent::Scheduled => "scheduled",
            TemporalIntent::Continuous => "continuous",
        };
        f.write_str(s)
    }
}

const ONE_SHOT_KEYWORDS: &[&str] = &[
    "run once",
    "one time",
    "single time",
    "execute once",
    "just once",
    "do once",
    "perform once",
];

const SCHEDULE_KEYWORDS: &[&str] = &[
    "every",
    "daily",
    "hourly",
    "weekly",
    "monthly",
    "cron",
    "at midnight",
    "at noon",
    "schedule",
    "periodically",
    "regularly",
    "each day",
    "each hour",
    "each week",
    "each month",
];

/// Classify instructions into a temporal intent.
pub fn detect_temporal_intent(instructions: &str) -> TemporalIntent {
    let lower = instructions.to_lowercase();

    if ONE_SHOT_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return TemporalIntent::OneShot;
    }
    if SCHEDULE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return TemporalIntent::Scheduled;
    }
    TemporalIntent::Continuous
}

// Matches "at 4pm", "at 16:30", "at 9:15 am".
static CLOCK_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"at\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?").expect("clock-time pattern")
});

/// Map schedule phrasing in instructions to a cron expression.
///
/// Returns None for instructions without a scheduled intent. Explicit clock
/// times win; named times and period keywords have fixed mappings; a
/// scheduled intent with no recognizable time runs at midnight.
pub fn schedule_expression(instructions: &str) -> Option<String> {
    if detect_temporal_intent(instructions) != TemporalIntent::Scheduled {
        return None;
    }

    let lower = instructions.to_lowercase();

    if let Some(caps) = CLOCK_TIME.captures(&lower) {
        let hour: u32 = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        let minute: u32 = caps
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        let meridiem = caps.get(3).map(|m| m.as_str());

        if hour <= 23 && minute <= 59 {
            let hour = match meridiem {
                Some("pm") if hour < 12 => hour + 12,
                Some("am") if hour == 12 => 0,
                _ => hour,
            };
            return Some(format!("{minute} {hour} * * *"));
        }
    }

    if lower.contains("at midnight") {
        return Some("0 0 * * *".to_string());
    }
    if lower.contains("at noon") {
        return Some("0 12 * * *".to_string());
    }
    if lower.contains("hourly") || lower.contains("every hour") || lower.contains("each hour") {
        return Some("0 * * * *".to_string());
    }
    if lower.contains("weekly") || lower.contains("every week") || lower.contains("each week") {
        return Some("0 9 * * 1".to_string());
    }
    if lower.contains("monthly") || lower.contains("every month") || lower.contains("each month") {
        return Some("0 9 1 * *".to_string());
    }

    // Scheduled but no recognizable time: run daily at midnight.
    Some("0 0 * * *".to_string())
}
