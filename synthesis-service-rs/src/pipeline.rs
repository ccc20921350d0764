// synthesis-service-rs/src/pipeline.rs
// Budget-gated synthesis: the entry point an external reconciler drives.
//
// Sequence per request: rate-limit gate -> quota reservation -> synthesis
// -> cost commit. Rejections surface as typed errors so the reconciler can
// decide when to requeue; generator trouble never surfaces (the
// synthesizer recovers it via the fallback template).

use std::sync::Arc;

use crate::quota_manager::QuotaManager;
use crate::rate_limiter::{RateDecision, RateLimiter};
use crate::synthesizer::{AgentSynthesizer, SynthesisRequest, SynthesisResponse, Synthesizer};
use crate::{Result, SynthesisError};

/// Synthesizer wrapped with rate and quota gates.
pub struct GatedSynthesizer {
    rate_limiter: Arc<RateLimiter>,
    quota: Arc<QuotaManager>,
    synthesizer: Arc<Synthesizer>,
}

impl GatedSynthesizer {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        quota: Arc<QuotaManager>,
        synthesizer: Arc<Synthesizer>,
    ) -> Self {
        Self {
            rate_limiter,
            quota,
            synthesizer,
        }
    }

    /// Run one gated synthesis attempt. The scope is the request namespace.
    pub async fn synthesize(&self, req: &SynthesisRequest) -> Result<SynthesisResponse> {
        let scope = req.namespace.as_str();

        if let RateDecision::Limited { retry_after } = self.rate_limiter.allow(scope).await {
            return Err(SynthesisError::RateLimitExceeded {
                scope: scope.to_string(),
                retry_after,
            });
        }

        let estimate = self.synthesizer.estimate_request_cost(req).total_cost;
        let reservation = self
            .quota
            .check_and_reserve(scope, estimate, &req.agent_name)
            .await?;

        let result = self.synthesizer.synthesize_agent(req).await;

        match &result {
            Ok(response) => {
                let actual = response.cost.as_ref().map(|c| c.total_cost).unwrap_or(0.0);
                self.quota
                    .commit(&reservation, actual, &req.agent_name, true, None)
                    .await;
            }
            Err(err) => {
                self.quota
                    .commit(&reservation, 0.0, &req.agent_name, false, Some(err.to_string()))
                    .await;
            }
        }

        result
    }
}
