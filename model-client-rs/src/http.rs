// model-client-rs/src/http.rs
// OpenAI-compatible HTTP chat model with exponential backoff retry.
//
// Configuration (environment):
// - MODEL_API_URL: chat completions endpoint (default: OpenAI)
// - MODEL_NAME: model identifier (default: "gpt-4o-mini")
// - MODEL_API_KEY: bearer token
// - MODEL_MAX_RETRIES: maximum retry attempts (default: 3)
// - MODEL_INITIAL_RETRY_DELAY_MS: first backoff delay (default: 1000)
// - MODEL_MAX_RETRY_DELAY_MS: backoff ceiling (default: 30000)
// - MODEL_REQUEST_TIMEOUT_SECS: per-request HTTP timeout (default: 60)

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{ChatMessage, ChatModel, ModelError, Role};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u32,
}

/// Configuration for `HttpChatModel`.
#[derive(Debug, Clone)]
pub struct HttpModelConfig {
    pub api_url: String,
    pub model: String,
    pub api_key: String,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub request_timeout: Duration,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for HttpModelConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: String::new(),
            max_retries: 3,
            initial_retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            request_timeout: Duration::from_secs(60),
            temperature: Some(0.2),
            max_tokens: Some(2_000),
        }
    }
}

impl HttpModelConfig {
    /// Build configuration from environment variables, never panicking on
    /// malformed values.
    pub fn from_env() -> Self {
        fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
            env::var(name)
                .ok()
                .and_then(|v| v.parse::<T>().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            api_url: env::var("MODEL_API_URL").unwrap_or(defaults.api_url),
            model: env::var("MODEL_NAME").unwrap_or(defaults.model),
            api_key: env::var("MODEL_API_KEY").unwrap_or_default(),
            max_retries: parse_var("MODEL_MAX_RETRIES", defaults.max_retries),
            initial_retry_delay_ms: parse_var(
                "MODEL_INITIAL_RETRY_DELAY_MS",
                defaults.initial_retry_delay_ms,
            ),
            max_retry_delay_ms: parse_var("MODEL_MAX_RETRY_DELAY_MS", defaults.max_retry_delay_ms),
            request_timeout: Duration::from_secs(parse_var("MODEL_REQUEST_TIMEOUT_SECS", 60)),
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
        }
    }
}

/// Chat model backed by an OpenAI-compatible HTTP endpoint.
#[derive(Debug)]
pub struct HttpChatModel {
    client: Client,
    config: HttpModelConfig,
}

impl HttpChatModel {
    pub fn new(config: HttpModelConfig) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ModelError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, ModelError> {
        Self::new(HttpModelConfig::from_env())
    }

    /// Backoff policy: exponential with jitter, capped per-attempt and in
    /// total elapsed time.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.initial_retry_delay_ms))
            .with_max_interval(Duration::from_millis(self.config.max_retry_delay_ms))
            .with_multiplier(2.0)
            .with_randomization_factor(0.5)
            .with_max_elapsed_time(Some(Duration::from_secs(120)))
            .build()
    }

    async fn execute_request(&self, messages: &[ChatMessage]) -> Result<ChatMessage, ModelError> {
        let wire: Vec<WireMessage<'_>> = messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: &m.content,
            })
            .collect();

        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages: wire,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = match self
            .client
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                return if err.is_timeout() {
                    Err(ModelError::Network(format!("request timed out: {err}")))
                } else if err.is_connect() {
                    Err(ModelError::Network(format!("connection failed: {err}")))
                } else {
                    Err(ModelError::Network(format!("network error: {err}")))
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return match status.as_u16() {
                400 => Err(ModelError::InvalidRequest(format!("bad request: {text}"))),
                401 => Err(ModelError::InvalidRequest(format!("unauthorized: {text}"))),
                403 => Err(ModelError::InvalidRequest(format!("forbidden: {text}"))),
                404 => Err(ModelError::ModelNotAvailable(format!("not found: {text}"))),
                429 => Err(ModelError::RateLimited(text)),
                500 | 502 | 503 | 504 => {
                    Err(ModelError::Server(format!("server error ({status}): {text}")))
                }
                _ => Err(ModelError::Other(format!("unexpected status {status}: {text}"))),
            };
        }

        let data: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Parse(format!("failed to parse response: {e}")))?;

        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::Parse("no choices returned in response".to_string()))?;

        if let Some(usage) = &data.usage {
            tracing::debug!(total_tokens = usage.total_tokens, "model request completed");
        }

        Ok(ChatMessage::assistant(choice.message.content))
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<ChatMessage, ModelError> {
        let mut backoff = self.create_backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if attempt > 1 {
                tracing::info!(attempt, model = %self.config.model, "retrying model request");
            }

            match self.execute_request(messages).await {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    if !err.is_retryable() || attempt > self.config.max_retries {
                        tracing::error!(attempt, error = %err, "model request failed");
                        return Err(err);
                    }

                    match backoff.next_backoff() {
                        Some(delay) => {
                            // Small extra jitter so concurrent workers don't
                            // converge on the same retry instant.
                            let jitter = rand::thread_rng().gen_range(0..=200);
                            let delay = delay + Duration::from_millis(jitter);
                            tracing::warn!(error = %err, ?delay, "retryable model error");
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            tracing::error!(error = %err, "exceeded maximum backoff time");
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
