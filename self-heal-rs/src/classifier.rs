// self-heal-rs/src/classifier.rs
// Heuristic classification of runtime error messages.
//
// Categories feed both the retained error records and the failure context
// embedded in re-synthesis prompts, so the generator knows whether it is
// fixing flaky networking or a logic bug.

use serde::{Deserialize, Serialize};

/// Coarse category of a runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    NetworkConnectivity,
    AuthFailure,
    ResourceExhaustion,
    ExternalService,
    InputValidation,
    RuntimeLogic,
    Timeout,
    Unknown,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorClass::NetworkConnectivity => "network_connectivity",
            ErrorClass::AuthFailure => "auth_failure",
            ErrorClass::ResourceExhaustion => "resource_exhaustion",
            ErrorClass::ExternalService => "external_service",
            ErrorClass::InputValidation => "input_validation",
            ErrorClass::RuntimeLogic => "runtime_logic",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Classify a raw error message by substring heuristics. Order matters:
/// more specific categories are checked first.
pub fn classify_error_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();

    if lower.contains("unauthorized")
        || lower.contains("forbidden")
        || lower.contains("authentication")
        || lower.contains("api key")
    {
        return ErrorClass::AuthFailure;
    }
    if lower.contains("timed out") || lower.contains("timeout") || lower.contains("deadline") {
        return ErrorClass::Timeout;
    }
    if lower.contains("connection")
        || lower.contains("network")
        || lower.contains("dns")
        || lower.contains("unreachable")
    {
        return ErrorClass::NetworkConnectivity;
    }
    if lower.contains("out of memory")
        || lower.contains("memory")
        || lower.contains("disk")
        || lower.contains("quota")
        || lower.contains("resource")
    {
        return ErrorClass::ResourceExhaustion;
    }
    if lower.contains("service unavailable")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("500")
        || lower.contains("upstream")
    {
        return ErrorClass::ExternalService;
    }
    if lower.contains("invalid")
        || lower.contains("validation")
        || lower.contains("malformed")
        || lower.contains("format")
    {
        return ErrorClass::InputValidation;
    }
    if lower.contains("nil")
        || lower.contains("null")
        || lower.contains("undefined")
        || lower.contains("panic")
        || lower.contains("exception")
        || lower.contains("no method")
    {
        return ErrorClass::RuntimeLogic;
    }

    ErrorClass::Unknown
}
