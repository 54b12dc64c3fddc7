//! In-memory implementation of every store trait
//!
//! Ledger, request and image rows share one lock so that a generation commit
//! and concurrent ledger operations are linearized. Provider rows and catalog
//! entries live in `DashMap`s, whose entry guards give per-row atomic updates.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::ledger::{CreditTransaction, LedgerEntry};
use crate::models::{CatalogItem, GeneratedImage, GenerationRequest};
use crate::provider::{ProviderConfig, ProviderScope};
use crate::store::{
    CatalogKind, CatalogStore, GenerationStore, LedgerStore, ProviderStore, ProviderUpdate,
    RequestUpdate,
};

#[derive(Default)]
struct Books {
    balances: HashMap<Uuid, i64>,
    transactions: Vec<CreditTransaction>,
    requests: HashMap<Uuid, GenerationRequest>,
    images: Vec<GeneratedImage>,
}

impl Books {
    fn balance(&self, organization_id: Uuid) -> Result<i64> {
        self.balances
            .get(&organization_id)
            .copied()
            .ok_or_else(|| AppError::NotFound(format!("organization {}", organization_id)))
    }

    /// Newest first
    fn recent(&self, organization_id: Uuid, limit: usize) -> Vec<CreditTransaction> {
        self.transactions
            .iter()
            .rev()
            .filter(|t| t.organization_id == organization_id)
            .take(limit)
            .cloned()
            .collect()
    }

    fn check(&self, entry: &LedgerEntry) -> Result<i64> {
        let balance = self.balance(entry.organization_id)?;

        let next = balance + entry.amount;
        if next < 0 {
            return Err(AppError::InsufficientCredits {
                required: -entry.amount,
                available: balance,
            });
        }
        Ok(next)
    }

    fn apply(&mut self, entry: LedgerEntry) -> Result<CreditTransaction> {
        let next = self.check(&entry)?;
        self.balances.insert(entry.organization_id, next);
        let tx = entry.into_transaction(Utc::now());
        self.transactions.push(tx.clone());
        Ok(tx)
    }
}

/// Process-local store, used by tests and single-node deployments
#[derive(Default)]
pub struct MemoryStore {
    books: Mutex<Books>,
    providers: DashMap<Uuid, ProviderConfig>,
    catalog: DashMap<(CatalogKind, Uuid), CatalogItem>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProviderStore for MemoryStore {
    async fn insert(&self, config: ProviderConfig) -> Result<()> {
        debug!(provider = %config.name, id = %config.id, "Storing provider config");
        self.providers.insert(config.id, config);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<ProviderConfig> {
        self.providers
            .get(&id)
            .map(|p| p.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("provider {}", id)))
    }

    async fn list(&self) -> Result<Vec<ProviderConfig>> {
        let mut all: Vec<ProviderConfig> = self.providers.iter().map(|p| p.value().clone()).collect();
        all.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(all)
    }

    async fn list_scoped(&self, scope: ProviderScope) -> Result<Vec<ProviderConfig>> {
        Ok(self
            .providers
            .iter()
            .filter(|p| match scope {
                ProviderScope::Organization(org) => p.organization_id == Some(org),
                ProviderScope::Global => p.organization_id.is_none(),
            })
            .map(|p| p.value().clone())
            .collect())
    }

    async fn update(&self, id: Uuid, f: ProviderUpdate) -> Result<ProviderConfig> {
        let mut entry = self
            .providers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("provider {}", id)))?;
        f(entry.value_mut());
        Ok(entry.value().clone())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn open_account(&self, organization_id: Uuid) -> Result<()> {
        self.books.lock().balances.entry(organization_id).or_insert(0);
        Ok(())
    }

    async fn balance(&self, organization_id: Uuid) -> Result<i64> {
        self.books.lock().balance(organization_id)
    }

    async fn apply(&self, entry: LedgerEntry) -> Result<CreditTransaction> {
        self.books.lock().apply(entry)
    }

    async fn statement(&self, organization_id: Uuid, limit: usize) -> Result<(i64, Vec<CreditTransaction>)> {
        let books = self.books.lock();
        let balance = books.balance(organization_id)?;
        Ok((balance, books.recent(organization_id, limit)))
    }
}

#[async_trait]
impl GenerationStore for MemoryStore {
    async fn commit_generation(
        &self,
        charge: LedgerEntry,
        request: GenerationRequest,
        images: Vec<GeneratedImage>,
    ) -> Result<GenerationRequest> {
        let mut books = self.books.lock();

        // All checks before the first write
        books.check(&charge)?;
        if books.requests.contains_key(&request.id) {
            return Err(AppError::Internal(format!("request {} already exists", request.id)));
        }
        if let Some(stray) = images.iter().find(|i| i.request_id != request.id) {
            return Err(AppError::Internal(format!(
                "image {} does not belong to request {}",
                stray.id, request.id
            )));
        }

        books.apply(charge)?;
        books.requests.insert(request.id, request.clone());
        books.images.extend(images);
        Ok(request)
    }

    async fn create_request(&self, request: GenerationRequest) -> Result<()> {
        let mut books = self.books.lock();
        if books.requests.contains_key(&request.id) {
            return Err(AppError::Internal(format!("request {} already exists", request.id)));
        }
        books.requests.insert(request.id, request);
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> Result<GenerationRequest> {
        self.books
            .lock()
            .requests
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("generation request {}", id)))
    }

    async fn update_request(&self, id: Uuid, f: RequestUpdate) -> Result<GenerationRequest> {
        let mut books = self.books.lock();
        let request = books
            .requests
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("generation request {}", id)))?;
        f(request);
        Ok(request.clone())
    }

    async fn add_image(&self, image: GeneratedImage) -> Result<()> {
        let mut books = self.books.lock();
        if !books.requests.contains_key(&image.request_id) {
            return Err(AppError::NotFound(format!("generation request {}", image.request_id)));
        }
        books.images.push(image);
        Ok(())
    }

    async fn list_images(&self, request_id: Uuid) -> Result<Vec<GeneratedImage>> {
        let mut images: Vec<GeneratedImage> = self
            .books
            .lock()
            .images
            .iter()
            .filter(|i| i.request_id == request_id)
            .cloned()
            .collect();
        images.sort_by_key(|i| (i.side, i.index));
        Ok(images)
    }

    async fn count_images(&self, request_id: Uuid) -> Result<u32> {
        Ok(self
            .books
            .lock()
            .images
            .iter()
            .filter(|i| i.request_id == request_id)
            .count() as u32)
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn insert(&self, kind: CatalogKind, item: CatalogItem) -> Result<()> {
        self.catalog.insert((kind, item.id), item);
        Ok(())
    }

    async fn find(&self, kind: CatalogKind, id: Uuid) -> Result<Option<CatalogItem>> {
        Ok(self.catalog.get(&(kind, id)).map(|i| i.value().clone()))
    }
}
