// synthesis-service-rs/src/rate_limiter.rs
// Per-scope sliding-window rate limiting for synthesis attempts.
//
// One attempt log per scope, each behind its own lock so unrelated scopes
// never contend. Entries older than the window are evicted lazily on
// access, which bounds memory by the number of distinct active scopes
// rather than by request volume.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

use crate::metrics::record_rate_limit_rejection;

/// Rate limiter settings.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Attempts admitted per scope within a rolling window.
    pub max_attempts: u32,
    /// Rolling window length.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            window: Duration::from_secs(3_600),
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Admitted; `remaining` attempts left in the current window.
    Allowed { remaining: u32 },
    /// Rejected; retry once `retry_after` has elapsed.
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateDecision::Allowed { .. } => None,
            RateDecision::Limited { retry_after } => Some(*retry_after),
        }
    }
}

/// Sliding-window synthesis rate limiter, one window per scope.
pub struct RateLimiter {
    config: RateLimiterConfig,
    scopes: RwLock<HashMap<String, Arc<Mutex<VecDeque<Instant>>>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            scopes: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Admit or reject a synthesis attempt for `scope`.
    pub async fn allow(&self, scope: &str) -> RateDecision {
        self.allow_at(scope, Instant::now()).await
    }

    pub(crate) async fn allow_at(&self, scope: &str, now: Instant) -> RateDecision {
        let window = self.scope_window(scope).await;
        let mut attempts = window.lock().await;

        // Lazy eviction: drop everything that has aged out of the window.
        while let Some(oldest) = attempts.front() {
            if now.duration_since(*oldest) >= self.config.window {
                attempts.pop_front();
            } else {
                break;
            }
        }

        if (attempts.len() as u32) < self.config.max_attempts {
            attempts.push_back(now);
            let remaining = self.config.max_attempts - attempts.len() as u32;
            tracing::debug!(scope, remaining, "synthesis rate limit check passed");
            RateDecision::Allowed { remaining }
        } else {
            // The window frees up when its oldest entry expires.
            let retry_after = attempts
                .front()
                .map(|oldest| self.config.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.config.window);

            tracing::info!(
                scope,
                limit = self.config.max_attempts,
                retry_after_secs = retry_after.as_secs(),
                "synthesis rate limit exceeded"
            );
            record_rate_limit_rejection(scope);
            RateDecision::Limited { retry_after }
        }
    }

    /// Number of scopes currently tracked.
    pub async fn active_scopes(&self) -> usize {
        self.scopes.read().await.len()
    }

    /// Clear all rate-limit state.
    pub async fn reset(&self) {
        self.scopes.write().await.clear();
    }

    async fn scope_window(&self, scope: &str) -> Arc<Mutex<VecDeque<Instant>>> {
        {
            let scopes = self.scopes.read().await;
            if let Some(window) = scopes.get(scope) {
                return Arc::clone(window);
            }
        }

        let mut scopes = self.scopes.write().await;
        Arc::clone(
            scopes
                .entry(scope.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new()))),
        )
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
