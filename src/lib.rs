//! Generation Orchestration Core
//!
//! Turns product photos into AI-generated fashion imagery by dispatching to
//! unreliable third-party image providers with health-aware failover, billing
//! organizations from a prepaid credit ledger only for images actually
//! delivered, and running queued work under a concurrency cap.

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod generation;
pub mod ledger;
pub mod models;
pub mod provider;
pub mod queue;
pub mod store;

pub use error::{AppError, Result};

use std::sync::Arc;
use tracing::info;

use clock::Clock;
use config::Settings;
use gateway::{FallbackDispatcher, HealthPolicy, HealthTracker};
use generation::{GenerationCoordinator, GenerationPlanner, PromptBuilder};
use ledger::CreditLedger;
use provider::{ProviderConfig, ProviderRegistry};
use queue::{JobQueue, JobStore, MemoryJobStore, QueueConfig};
use store::{CatalogStore, GenerationStore, LedgerStore, MemoryStore, ProviderStore};

/// Persistence handles. `ledger` and `generations` must share one backing
/// store so a generation commit can debit and insert atomically.
#[derive(Clone)]
pub struct Stores {
    pub providers: Arc<dyn ProviderStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub generations: Arc<dyn GenerationStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub jobs: Arc<dyn JobStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        let memory = Arc::new(MemoryStore::new());
        Self {
            providers: memory.clone(),
            ledger: memory.clone(),
            generations: memory.clone(),
            catalog: memory,
            jobs: Arc::new(MemoryJobStore::new()),
        }
    }
}

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<Settings>,
    pub stores: Stores,
    pub registry: Arc<ProviderRegistry>,
    pub health: Arc<HealthTracker>,
    pub dispatcher: Arc<FallbackDispatcher>,
    pub ledger: Arc<CreditLedger>,
    pub coordinator: Arc<GenerationCoordinator>,
    pub queue: Arc<JobQueue>,
}

impl AppState {
    /// Wire every component from settings
    pub fn new(
        settings: Settings,
        stores: Stores,
        registry: Arc<ProviderRegistry>,
        clock: Arc<dyn Clock>,
        prompts: Arc<dyn PromptBuilder>,
    ) -> Self {
        let health = Arc::new(HealthTracker::new(
            stores.providers.clone(),
            clock.clone(),
            HealthPolicy::from(&settings.health),
        ));
        let dispatcher = Arc::new(FallbackDispatcher::new(
            stores.providers.clone(),
            registry.clone(),
            health.clone(),
            clock.clone(),
            &settings.dispatcher,
        ));
        let ledger = Arc::new(CreditLedger::new(stores.ledger.clone()));
        let planner = Arc::new(GenerationPlanner::new(
            stores.catalog.clone(),
            prompts,
            settings.pricing,
            settings.generation,
        ));
        let coordinator = Arc::new(GenerationCoordinator::new(
            planner.clone(),
            dispatcher.clone(),
            ledger.clone(),
            stores.generations.clone(),
        ));
        let queue = Arc::new(JobQueue::new(
            planner,
            dispatcher.clone(),
            ledger.clone(),
            stores.generations.clone(),
            stores.jobs.clone(),
            clock,
            QueueConfig::from(&settings.queue),
        ));

        Self {
            settings: Arc::new(settings),
            stores,
            registry,
            health,
            dispatcher,
            ledger,
            coordinator,
            queue,
        }
    }

    /// Load configured providers and opening balances into the stores
    pub async fn seed(&self) -> Result<()> {
        for seed in &self.settings.providers {
            let config = ProviderConfig::from_seed(seed);
            info!(provider = %config.name, kind = %config.kind, priority = config.priority, "Seeding provider");
            self.stores.providers.insert(config).await?;
        }

        for account in &self.settings.accounts {
            self.ledger
                .open_account(account.organization_id, account.credits)
                .await?;
            info!(organization_id = %account.organization_id, credits = account.credits, "Seeded credit account");
        }

        Ok(())
    }
}
