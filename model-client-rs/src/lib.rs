// model-client-rs/src/lib.rs
// Language-model capability interface for the Loom synthesis control plane.
//
// The control plane is agnostic to which provider implements generation;
// everything upstream programs against the narrow `ChatModel` trait. Two
// implementations ship here:
// - `HttpChatModel`: OpenAI-compatible HTTP client with retry/backoff.
// - `ScriptedChatModel`: in-process model for tests and offline runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod http;
mod scripted;


pub use http::{HttpChatModel, HttpModelConfig};
pub use scripted::ScriptedChatModel;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message exchanged with a chat model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Errors produced by chat model implementations.
///
/// The split between retryable and non-retryable variants drives the retry
/// loop in `HttpChatModel`; callers higher up the stack treat every variant
/// as a recoverable generator failure.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// 400/401/403/404-class failures that retrying will not fix.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Provider-side throttling (429). Retryable with increasing delays.
    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    /// The requested model is unavailable or rejected the content.
    #[error("model not available: {0}")]
    ModelNotAvailable(String),

    /// 5xx-class failures that might be transient.
    #[error("provider server error: {0}")]
    Server(String),

    /// Connection failures, timeouts, DNS errors.
    #[error("network error: {0}")]
    Network(String),

    /// The provider answered but the payload could not be interpreted.
    #[error("response parse error: {0}")]
    Parse(String),

    /// Anything that did not fit the categories above.
    #[error("model error: {0}")]
    Other(String),
}

impl ModelError {
    /// Whether another attempt has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModelError::Server(_) | ModelError::Network(_) | ModelError::RateLimited(_)
        )
    }
}

/// Narrow capability interface over a chat-completion model.
///
/// Implementations must not block indefinitely: callers bound each call
/// with their own deadline and treat expiry as a generator failure.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a single assistant reply for the given message history.
    async fn generate(&self, messages: &[ChatMessage]) -> Result<ChatMessage, ModelError>;

    /// Identifier of the underlying model, used for cost attribution.
    fn model_name(&self) -> &str;
}
