// self-heal-rs/src/error_record.rs
// Structured runtime failure record, as reported by the agent runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::{classify_error_message, ErrorClass};

/// One runtime failure of deployed agent code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeErrorRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub class: ErrorClass,
    pub message: String,
    /// Reference into the tracing backend, when the runtime supplied one.
    pub trace_ref: Option<String>,
    /// Container exit code, when the failure killed the process.
    pub exit_code: Option<i32>,
    /// Which synthesis attempt produced the failing code.
    pub synthesis_attempt: u32,
}

impl RuntimeErrorRecord {
    /// Build a record from a raw failure message, classifying it on the way.
    pub fn from_message(
        message: impl Into<String>,
        exit_code: Option<i32>,
        synthesis_attempt: u32,
    ) -> Self {
        let message = message.into();
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            class: classify_error_message(&message),
            message,
            trace_ref: None,
            exit_code,
            synthesis_attempt,
        }
    }

    pub fn with_trace_ref(mut self, trace_ref: impl Into<String>) -> Self {
        self.trace_ref = Some(trace_ref.into());
        self
    }
}
