//! Provider health tracking
//!
//! Health is derived from the rolling counters stored on each
//! [`ProviderConfig`]. The policy is a half-open circuit breaker: a provider
//! with too few samples is always usable, a provider whose error rate exceeds
//! the threshold is skipped while its last error is inside the cooldown
//! window, and once the cooldown has elapsed it is offered again as a probe.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::HealthConfig;
use crate::error::Result;
use crate::provider::ProviderConfig;
use crate::store::ProviderStore;

/// Thresholds for the health predicate
#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    /// Below this many calls the provider is healthy regardless of errors
    pub min_samples: u64,
    pub error_rate_threshold: f64,
    pub cooldown: chrono::Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::from(&HealthConfig::default())
    }
}

impl From<&HealthConfig> for HealthPolicy {
    fn from(config: &HealthConfig) -> Self {
        Self {
            min_samples: config.min_samples,
            error_rate_threshold: config.error_rate_threshold,
            cooldown: chrono::Duration::seconds(config.cooldown_secs as i64),
        }
    }
}

impl HealthPolicy {
    pub fn is_healthy(&self, config: &ProviderConfig, now: DateTime<Utc>) -> bool {
        if config.total_calls() < self.min_samples {
            return true;
        }

        if config.error_rate() <= self.error_rate_threshold {
            return true;
        }

        match config.last_error_at {
            Some(at) => now - at >= self.cooldown,
            None => true,
        }
    }
}

/// Admin view of one provider's health
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub organization_id: Option<Uuid>,
    pub priority: i32,
    pub active: bool,
    pub success_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub avg_response_ms: f64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub healthy: bool,
}

/// Owns the health counters of every provider
pub struct HealthTracker {
    store: Arc<dyn ProviderStore>,
    clock: Arc<dyn Clock>,
    policy: HealthPolicy,
}

impl HealthTracker {
    pub fn new(store: Arc<dyn ProviderStore>, clock: Arc<dyn Clock>, policy: HealthPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Check if a provider may be used right now
    pub fn is_healthy(&self, config: &ProviderConfig) -> bool {
        self.policy.is_healthy(config, self.clock.now())
    }

    /// Count a successful call: bump successes, fold the latency into the
    /// running mean and let one past error age out.
    pub async fn record_success(&self, id: Uuid, elapsed_ms: f64) -> Result<ProviderConfig> {
        let updated = self
            .store
            .update(
                id,
                Box::new(move |p: &mut ProviderConfig| {
                    let n = p.success_count as f64;
                    p.avg_response_ms = (p.avg_response_ms * n + elapsed_ms) / (n + 1.0);
                    p.success_count += 1;
                    p.error_count = p.error_count.saturating_sub(1);
                }),
            )
            .await?;

        debug!(
            provider = %updated.name,
            success_count = updated.success_count,
            error_count = updated.error_count,
            avg_response_ms = updated.avg_response_ms,
            "Recorded provider success"
        );
        Ok(updated)
    }

    pub async fn record_failure(&self, id: Uuid, message: &str) -> Result<ProviderConfig> {
        let now = self.clock.now();
        let message = message.to_string();
        let policy = self.policy;
        let was_healthy = {
            let current = self.store.get(id).await?;
            policy.is_healthy(&current, now)
        };

        let updated = self
            .store
            .update(
                id,
                Box::new(move |p: &mut ProviderConfig| {
                    p.error_count += 1;
                    p.last_error = Some(message);
                    p.last_error_at = Some(now);
                }),
            )
            .await?;

        if was_healthy && !policy.is_healthy(&updated, now) {
            warn!(
                provider = %updated.name,
                error_rate = updated.error_rate(),
                "Provider marked unhealthy"
            );
        } else {
            debug!(
                provider = %updated.name,
                error_count = updated.error_count,
                "Recorded provider failure"
            );
        }
        Ok(updated)
    }

    /// Health of every configured provider
    pub async fn snapshot(&self) -> Result<Vec<ProviderHealth>> {
        let now = self.clock.now();
        Ok(self
            .store
            .list()
            .await?
            .iter()
            .map(|p| self.describe(p, now))
            .collect())
    }

    /// Get health summary (total, healthy, unhealthy)
    pub async fn summary(&self) -> Result<(usize, usize, usize)> {
        let snapshot = self.snapshot().await?;
        let healthy = snapshot.iter().filter(|p| p.healthy).count();
        Ok((snapshot.len(), healthy, snapshot.len() - healthy))
    }

    /// Zero the counters and clear the last error
    pub async fn reset(&self, id: Uuid) -> Result<ProviderHealth> {
        let updated = self
            .store
            .update(
                id,
                Box::new(|p: &mut ProviderConfig| {
                    p.success_count = 0;
                    p.error_count = 0;
                    p.avg_response_ms = 0.0;
                    p.last_error = None;
                    p.last_error_at = None;
                }),
            )
            .await?;
        info!(provider = %updated.name, "Provider health reset");
        Ok(self.describe(&updated, self.clock.now()))
    }

    fn describe(&self, p: &ProviderConfig, now: DateTime<Utc>) -> ProviderHealth {
        ProviderHealth {
            id: p.id,
            name: p.name.clone(),
            kind: p.kind.clone(),
            organization_id: p.organization_id,
            priority: p.priority,
            active: p.active,
            success_count: p.success_count,
            error_count: p.error_count,
            error_rate: p.error_rate(),
            avg_response_ms: p.avg_response_ms,
            last_error: p.last_error.clone(),
            last_error_at: p.last_error_at,
            healthy: self.policy.is_healthy(p, now),
        }
    }
}
