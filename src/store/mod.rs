//! Persistence boundary
//!
//! Every entity the orchestration core touches is read and written through
//! these traits. Implementations must make each method atomic; in particular
//! [`LedgerStore::apply`] and [`GenerationStore::commit_generation`] are
//! check-and-write units that either fully apply or leave no trace.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::ledger::{CreditTransaction, LedgerEntry};
use crate::models::{CatalogItem, GeneratedImage, GenerationRequest, GenerationStatus, Side};
use crate::provider::{ProviderConfig, ProviderScope};

pub use memory::MemoryStore;

/// Mutation applied to a stored row under the store's lock
pub type ProviderUpdate = Box<dyn FnOnce(&mut ProviderConfig) + Send>;
pub type RequestUpdate = Box<dyn FnOnce(&mut GenerationRequest) + Send>;

#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn insert(&self, config: ProviderConfig) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<ProviderConfig>;

    async fn list(&self) -> Result<Vec<ProviderConfig>>;

    /// Every provider in the given scope, active or not, unsorted
    async fn list_scoped(&self, scope: ProviderScope) -> Result<Vec<ProviderConfig>>;

    /// Atomic read-modify-write of one provider row
    async fn update(&self, id: Uuid, f: ProviderUpdate) -> Result<ProviderConfig>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create an account with a zero balance; no-op if it exists
    async fn open_account(&self, organization_id: Uuid) -> Result<()>;

    async fn balance(&self, organization_id: Uuid) -> Result<i64>;

    /// Add `entry.amount` (signed) to the balance and append the transaction.
    /// Fails with `InsufficientCredits` and changes nothing if the balance
    /// would go negative.
    async fn apply(&self, entry: LedgerEntry) -> Result<CreditTransaction>;

    /// Current balance and the newest `limit` transactions (newest first),
    /// read as one unit so the balance reflects exactly the transactions
    /// returned and no later ones
    async fn statement(&self, organization_id: Uuid, limit: usize) -> Result<(i64, Vec<CreditTransaction>)>;
}

#[async_trait]
pub trait GenerationStore: Send + Sync {
    /// Debit the ledger, create the request and persist its images as one unit
    async fn commit_generation(
        &self,
        charge: LedgerEntry,
        request: GenerationRequest,
        images: Vec<GeneratedImage>,
    ) -> Result<GenerationRequest>;

    async fn create_request(&self, request: GenerationRequest) -> Result<()>;

    async fn get_request(&self, id: Uuid) -> Result<GenerationRequest>;

    async fn update_request(&self, id: Uuid, f: RequestUpdate) -> Result<GenerationRequest>;

    async fn add_image(&self, image: GeneratedImage) -> Result<()>;

    /// Images of a request ordered by side, then index
    async fn list_images(&self, request_id: Uuid) -> Result<Vec<GeneratedImage>>;

    async fn count_images(&self, request_id: Uuid) -> Result<u32>;

    async fn set_side_error(&self, id: Uuid, side: Side, message: String) -> Result<GenerationRequest> {
        self.update_request(id, Box::new(move |r: &mut GenerationRequest| r.set_error(side, message)))
            .await
    }

    async fn finalize(
        &self,
        id: Uuid,
        status: GenerationStatus,
        credits_consumed: i64,
    ) -> Result<GenerationRequest> {
        self.update_request(
            id,
            Box::new(move |r: &mut GenerationRequest| {
                r.status = status;
                r.credits_consumed = credits_consumed;
            }),
        )
        .await
    }
}

/// Kinds of catalog entries a request can reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    Product,
    ModelProfile,
    ScenePreset,
}

impl std::fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogKind::Product => f.write_str("product"),
            CatalogKind::ModelProfile => f.write_str("model profile"),
            CatalogKind::ScenePreset => f.write_str("scene preset"),
        }
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert(&self, kind: CatalogKind, item: CatalogItem) -> Result<()>;

    async fn find(&self, kind: CatalogKind, id: Uuid) -> Result<Option<CatalogItem>>;
}
