// synthesis-service-rs/src/quota_manager.rs
// Per-scope daily cost and attempt quotas.
//
// Accumulators are keyed by the UTC calendar date and roll over on access
// when the date changes, so both ceilings reset exactly at the UTC day
// boundary. Admission works as reserve-then-commit: `check_and_reserve`
// books the cost estimate and the attempt, `commit` reconciles the
// reservation with the real cost once generation finishes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::metrics::record_quota_rejection;

const HISTORY_RETENTION_DAYS: i64 = 7;

/// Daily ceilings per scope.
#[derive(Debug, Clone)]
pub struct QuotaLimits {
    pub max_cost_per_day: f64,
    pub max_attempts_per_day: u32,
    pub currency: String,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            max_cost_per_day: 10.0,
            max_attempts_per_day: 50,
            currency: "USD".to_string(),
        }
    }
}

/// Quota rejection, distinguishing which ceiling would be crossed.
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error(
        "synthesis cost quota exceeded for scope {scope}: current {current:.4} + estimated \
         {estimated:.4} > limit {limit:.4} {currency} (resets at {resets_at})"
    )]
    CostExceeded {
        scope: String,
        current: f64,
        estimated: f64,
        limit: f64,
        currency: String,
        resets_at: DateTime<Utc>,
    },

    #[error(
        "synthesis attempt quota exceeded for scope {scope}: {attempts} attempts today, limit \
         {limit} (resets at {resets_at})"
    )]
    AttemptsExceeded {
        scope: String,
        attempts: u32,
        limit: u32,
        resets_at: DateTime<Utc>,
    },
}

/// A booked cost estimate, to be reconciled via `commit`.
#[derive(Debug, Clone)]
pub struct CostReservation {
    pub scope: String,
    pub estimated: f64,
}

/// One settled synthesis cost record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEntry {
    pub timestamp: DateTime<Utc>,
    pub cost: f64,
    pub agent: String,
}

/// One synthesis attempt record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptEntry {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug)]
struct ScopeQuota {
    day: NaiveDate,
    cost: f64,
    attempts: u32,
    cost_history: Vec<CostEntry>,
    attempt_history: Vec<AttemptEntry>,
}

impl ScopeQuota {
    fn new(day: NaiveDate) -> Self {
        Self {
            day,
            cost: 0.0,
            attempts: 0,
            cost_history: Vec::new(),
            attempt_history: Vec::new(),
        }
    }

    /// Reset accumulators when the UTC date has advanced, trimming history
    /// past the retention horizon.
    fn roll_over_if_needed(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today == self.day {
            return;
        }

        self.day = today;
        self.cost = 0.0;
        self.attempts = 0;

        let cutoff = now - chrono::Duration::days(HISTORY_RETENTION_DAYS);
        self.cost_history.retain(|e| e.timestamp > cutoff);
        self.attempt_history.retain(|e| e.timestamp > cutoff);
    }
}

fn next_utc_midnight(day: NaiveDate) -> DateTime<Utc> {
    let next = day.succ_opt().unwrap_or(day);
    Utc.with_ymd_and_hms(next.year(), next.month(), next.day(), 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Daily synthesis quota manager, one accumulator per scope.
pub struct QuotaManager {
    limits: QuotaLimits,
    scopes: RwLock<HashMap<String, Arc<Mutex<ScopeQuota>>>>,
}

impl QuotaManager {
    pub fn new(limits: QuotaLimits) -> Self {
        Self {
            limits,
            scopes: RwLock::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> &QuotaLimits {
        &self.limits
    }

    /// Admit a synthesis attempt with its cost estimate, booking both
    /// against today's accumulators. Fails without booking anything when
    /// either ceiling would be crossed.
    pub async fn check_and_reserve(
        &self,
        scope: &str,
        estimated_cost: f64,
        agent: &str,
    ) -> Result<CostReservation, QuotaError> {
        self.check_and_reserve_at(scope, estimated_cost, agent, Utc::now())
            .await
    }

    pub(crate) async fn check_and_reserve_at(
        &self,
        scope: &str,
        estimated_cost: f64,
        agent: &str,
        now: DateTime<Utc>,
    ) -> Result<CostReservation, QuotaError> {
        let entry = self.scope_quota(scope, now).await;
        let mut quota = entry.lock().await;
        quota.roll_over_if_needed(now);

        if quota.attempts >= self.limits.max_attempts_per_day {
            record_quota_rejection(scope, "attempts");
            return Err(QuotaError::AttemptsExceeded {
                scope: scope.to_string(),
                attempts: quota.attempts,
                limit: self.limits.max_attempts_per_day,
                resets_at: next_utc_midnight(quota.day),
            });
        }

        let projected = quota.cost + estimated_cost;
        if projected > self.limits.max_cost_per_day {
            record_quota_rejection(scope, "cost");
            return Err(QuotaError::CostExceeded {
                scope: scope.to_string(),
                current: quota.cost,
                estimated: estimated_cost,
                limit: self.limits.max_cost_per_day,
                currency: self.limits.currency.clone(),
                resets_at: next_utc_midnight(quota.day),
            });
        }

        quota.attempts += 1;
        quota.cost = projected;
        quota.attempt_history.push(AttemptEntry {
            timestamp: now,
            agent: agent.to_string(),
            success: false,
            error: None,
        });

        tracing::debug!(
            scope,
            agent,
            estimated_cost,
            daily_cost = quota.cost,
            daily_attempts = quota.attempts,
            "synthesis quota reserved"
        );

        Ok(CostReservation {
            scope: scope.to_string(),
            estimated: estimated_cost,
        })
    }

    /// Reconcile a reservation with the actual cost of the finished
    /// attempt. An `actual_cost` of zero refunds the whole estimate (the
    /// generator was never charged).
    pub async fn commit(
        &self,
        reservation: &CostReservation,
        actual_cost: f64,
        agent: &str,
        success: bool,
        error: Option<String>,
    ) {
        let now = Utc::now();
        let entry = self.scope_quota(&reservation.scope, now).await;
        let mut quota = entry.lock().await;
        quota.roll_over_if_needed(now);

        quota.cost = (quota.cost - reservation.estimated + actual_cost).max(0.0);
        quota.cost_history.push(CostEntry {
            timestamp: now,
            cost: actual_cost,
            agent: agent.to_string(),
        });
        if let Some(last) = quota.attempt_history.last_mut() {
            last.success = success;
            last.error = error;
        }

        tracing::debug!(
            scope = %reservation.scope,
            agent,
            actual_cost,
            daily_cost = quota.cost,
            "synthesis cost committed"
        );
    }

    /// Remaining budget for a scope: (cost, attempts).
    pub async fn remaining(&self, scope: &str) -> (f64, u32) {
        let now = Utc::now();
        let entry = self.scope_quota(scope, now).await;
        let mut quota = entry.lock().await;
        quota.roll_over_if_needed(now);

        let cost = (self.limits.max_cost_per_day - quota.cost).max(0.0);
        let attempts = self.limits.max_attempts_per_day.saturating_sub(quota.attempts);
        (cost, attempts)
    }

    /// Current usage for a scope: (cost, attempts).
    pub async fn usage(&self, scope: &str) -> (f64, u32) {
        let now = Utc::now();
        let entry = self.scope_quota(scope, now).await;
        let mut quota = entry.lock().await;
        quota.roll_over_if_needed(now);
        (quota.cost, quota.attempts)
    }

    /// Clear all quota state.
    pub async fn reset(&self) {
        self.scopes.write().await.clear();
    }

    async fn scope_quota(&self, scope: &str, now: DateTime<Utc>) -> Arc<Mutex<ScopeQuota>> {
        {
            let scopes = self.scopes.read().await;
            if let Some(entry) = scopes.get(scope) {
                return Arc::clone(entry);
            }
        }

        let mut scopes = self.scopes.write().await;
        Arc::clone(
            scopes
                .entry(scope.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(ScopeQuota::new(now.date_naive())))),
        )
    }
}

impl Default for QuotaManager {
    fn default() -> Self {
        Self::new(QuotaLimits::default())
    }
}
