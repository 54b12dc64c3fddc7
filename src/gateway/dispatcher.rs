//! Health-aware fallback dispatcher
//!
//! Providers are tried in ascending priority. Each healthy provider gets up
//! to `max_retries` attempts, every attempt raced against the provider's
//! `timeout_ms`, with exponential backoff between attempts. The first image
//! produced wins; only when every provider is skipped or exhausted does the
//! dispatcher fail.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::DispatcherConfig;
use crate::error::{AppError, Result};
use crate::gateway::health_check::HealthTracker;
use crate::provider::{GenerationOptions, ProviderConfig, ProviderRegistry, ProviderScope};
use crate::store::ProviderStore;

/// Successful dispatch
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub image_url: String,
    pub provider_used: String,
    pub provider_id: Uuid,
    /// Attempts across all providers, including the successful one
    pub attempts: u32,
    /// Skip reasons and exhausted providers encountered before success
    pub failed_providers: Vec<String>,
}

/// Exponential backoff, doubling from `base` and capped at `max`
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    /// Delay after the `attempt`-th failure (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl From<&DispatcherConfig> for Backoff {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

pub struct FallbackDispatcher {
    store: Arc<dyn ProviderStore>,
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
    clock: Arc<dyn Clock>,
    backoff: Backoff,
    error_truncate: usize,
}

impl FallbackDispatcher {
    pub fn new(
        store: Arc<dyn ProviderStore>,
        registry: Arc<ProviderRegistry>,
        health: Arc<HealthTracker>,
        clock: Arc<dyn Clock>,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            store,
            registry,
            health,
            clock,
            backoff: Backoff::from(config),
            error_truncate: config.error_truncate,
        }
    }

    /// Organization providers, or the global fallbacks when it has no active
    /// one, sorted by ascending priority. Disabled rows are kept so that
    /// dispatch can report them as skipped.
    pub async fn providers_for(&self, organization_id: Uuid) -> Result<Vec<ProviderConfig>> {
        let mut providers = self
            .store
            .list_scoped(ProviderScope::Organization(organization_id))
            .await?;

        if !providers.iter().any(|p| p.active) {
            debug!(organization_id = %organization_id, "No active organization providers, using global fallbacks");
            providers = self.store.list_scoped(ProviderScope::Global).await?;
        }

        providers.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(providers)
    }

    /// Produce one image, failing over across providers
    pub async fn dispatch(
        &self,
        organization_id: Uuid,
        options: &GenerationOptions,
    ) -> Result<DispatchOutcome> {
        let providers = self.providers_for(organization_id).await?;
        if providers.is_empty() {
            return Err(AppError::AllProvidersFailed {
                attempts: 0,
                failed_providers: vec![],
                last_error: "no active providers configured".to_string(),
            });
        }

        let mut attempts = 0u32;
        let mut failed_providers = Vec::new();
        let mut last_error = String::new();

        for provider in &providers {
            if !provider.active {
                debug!(provider = %provider.name, "Skipping disabled provider");
                failed_providers.push(format!("{}: skipped (disabled)", provider.name));
                continue;
            }

            if !self.health.is_healthy(provider) {
                debug!(provider = %provider.name, error_rate = provider.error_rate(), "Skipping unhealthy provider");
                failed_providers.push(format!(
                    "{}: skipped (unhealthy, error rate {:.0}%)",
                    provider.name,
                    provider.error_rate() * 100.0
                ));
                continue;
            }

            let Some(adapter) = self.registry.get(&provider.kind) else {
                warn!(provider = %provider.name, kind = %provider.kind, "No adapter registered for provider kind");
                failed_providers.push(format!(
                    "{}: skipped (no adapter for kind '{}')",
                    provider.name, provider.kind
                ));
                continue;
            };

            let retries = provider.max_retries.max(1);
            let timeout = Duration::from_millis(provider.timeout_ms);

            for attempt in 1..=retries {
                attempts += 1;
                let started = Instant::now();

                let error = match tokio::time::timeout(timeout, adapter.generate_image(provider, options)).await {
                    Ok(Ok(image_url)) => {
                        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                        if let Err(e) = self.health.record_success(provider.id, elapsed_ms).await {
                            warn!(provider = %provider.name, error = %e, "Failed to record provider success");
                        }
                        info!(
                            provider = %provider.name,
                            organization_id = %organization_id,
                            attempts = attempts,
                            elapsed_ms = elapsed_ms,
                            "Image generated"
                        );
                        return Ok(DispatchOutcome {
                            image_url,
                            provider_used: provider.name.clone(),
                            provider_id: provider.id,
                            attempts,
                            failed_providers,
                        });
                    }
                    Ok(Err(e)) => e,
                    Err(_) => AppError::ProviderTimeout {
                        provider: provider.name.clone(),
                        timeout_ms: provider.timeout_ms,
                    },
                };

                last_error = error.to_string();
                warn!(
                    provider = %provider.name,
                    attempt = attempt,
                    max_retries = retries,
                    error = %last_error,
                    "Provider attempt failed"
                );
                if let Err(e) = self.health.record_failure(provider.id, &last_error).await {
                    warn!(provider = %provider.name, error = %e, "Failed to record provider failure");
                }

                if attempt < retries {
                    let delay = self.backoff.delay(attempt);
                    debug!(provider = %provider.name, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                    self.clock.sleep(delay).await;
                } else {
                    failed_providers.push(
                        AppError::ProviderExhausted {
                            provider: provider.name.clone(),
                            retries,
                            last_error: truncate(&last_error, self.error_truncate),
                        }
                        .to_string(),
                    );
                }
            }
        }

        if last_error.is_empty() {
            last_error = "no healthy providers available".to_string();
        }

        warn!(
            organization_id = %organization_id,
            attempts = attempts,
            failed = failed_providers.len(),
            "All providers failed"
        );
        Err(AppError::AllProvidersFailed {
            attempts,
            failed_providers,
            last_error,
        })
    }
}

fn truncate(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        message.to_string()
    } else {
        let mut cut: String = message.chars().take(max_chars).collect();
        cut.push_str("...");
        cut
    }
}
