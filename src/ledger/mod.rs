//! Prepaid credit ledger
//!
//! Every balance change goes through [`LedgerStore::apply`], which checks and
//! appends in one atomic step, so an organization's balance always equals the
//! sum of its transaction amounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::store::LedgerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Grant,
    Purchase,
    Generation,
    Refund,
    Adjustment,
}

/// Entity that triggered a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReference {
    pub entity: String,
    pub id: Uuid,
}

/// Immutable ledger row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Signed; debits are negative
    pub amount: i64,
    pub transaction_type: TransactionType,
    pub note: String,
    pub reference: Option<TransactionReference>,
    pub created_at: DateTime<Utc>,
}

/// Free-text note plus optional reference attached to a transaction
#[derive(Debug, Clone, Default)]
pub struct TransactionMeta {
    pub note: String,
    pub reference: Option<TransactionReference>,
}

impl TransactionMeta {
    pub fn note(note: impl Into<String>) -> Self {
        Self {
            note: note.into(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, entity: impl Into<String>, id: Uuid) -> Self {
        self.reference = Some(TransactionReference {
            entity: entity.into(),
            id,
        });
        self
    }
}

/// A balance change waiting to be applied by a store
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub organization_id: Uuid,
    pub amount: i64,
    pub transaction_type: TransactionType,
    pub meta: TransactionMeta,
}

impl LedgerEntry {
    pub fn debit(organization_id: Uuid, amount: i64, transaction_type: TransactionType, meta: TransactionMeta) -> Self {
        Self {
            organization_id,
            amount: -amount,
            transaction_type,
            meta,
        }
    }

    pub fn credit(organization_id: Uuid, amount: i64, transaction_type: TransactionType, meta: TransactionMeta) -> Self {
        Self {
            organization_id,
            amount,
            transaction_type,
            meta,
        }
    }

    pub fn into_transaction(self, created_at: DateTime<Utc>) -> CreditTransaction {
        CreditTransaction {
            id: Uuid::new_v4(),
            organization_id: self.organization_id,
            amount: self.amount,
            transaction_type: self.transaction_type,
            note: self.meta.note,
            reference: self.meta.reference,
            created_at,
        }
    }
}

/// Transaction with the balance reconstructed as of right after it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub transaction: CreditTransaction,
    pub balance_after: i64,
}

/// Credits held for an operation that has not finished yet. Consumed by
/// [`CreditLedger::settle`] or [`CreditLedger::release`].
#[derive(Debug)]
pub struct Reservation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub amount: i64,
    pub transaction_type: TransactionType,
}

pub struct CreditLedger {
    store: Arc<dyn LedgerStore>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Create the account and record the opening grant
    pub async fn open_account(&self, organization_id: Uuid, initial: i64) -> Result<()> {
        self.store.open_account(organization_id).await?;
        if initial > 0 {
            self.add(organization_id, initial, TransactionType::Grant, "Opening balance")
                .await?;
        }
        Ok(())
    }

    pub async fn get_balance(&self, organization_id: Uuid) -> Result<i64> {
        self.store.balance(organization_id).await
    }

    pub async fn has_enough(&self, organization_id: Uuid, amount: i64) -> Result<bool> {
        Ok(self.get_balance(organization_id).await? >= amount)
    }

    /// Debit `amount`. The balance check happens inside the store's atomic
    /// apply, so concurrent callers cannot overdraw.
    pub async fn deduct(
        &self,
        organization_id: Uuid,
        amount: i64,
        transaction_type: TransactionType,
        meta: TransactionMeta,
    ) -> Result<CreditTransaction> {
        if amount <= 0 {
            return Err(AppError::InvalidRequest(format!(
                "Deduction must be positive, got {}",
                amount
            )));
        }

        let tx = self
            .store
            .apply(LedgerEntry::debit(organization_id, amount, transaction_type, meta))
            .await?;
        info!(organization_id = %organization_id, amount = amount, kind = ?transaction_type, "Credits deducted");
        Ok(tx)
    }

    pub async fn add(
        &self,
        organization_id: Uuid,
        amount: i64,
        transaction_type: TransactionType,
        note: impl Into<String>,
    ) -> Result<CreditTransaction> {
        if amount <= 0 {
            return Err(AppError::InvalidRequest(format!(
                "Credit must be positive, got {}",
                amount
            )));
        }

        let tx = self
            .store
            .apply(LedgerEntry::credit(
                organization_id,
                amount,
                transaction_type,
                TransactionMeta::note(note),
            ))
            .await?;
        info!(organization_id = %organization_id, amount = amount, kind = ?transaction_type, "Credits added");
        Ok(tx)
    }

    /// Newest-first history with the running balance after each entry
    pub async fn history(&self, organization_id: Uuid, limit: usize) -> Result<Vec<HistoryEntry>> {
        let (current, transactions) = self.store.statement(organization_id, limit).await?;

        let mut newer_sum = 0i64;
        Ok(transactions
            .into_iter()
            .map(|transaction| {
                let balance_after = current - newer_sum;
                newer_sum += transaction.amount;
                HistoryEntry {
                    transaction,
                    balance_after,
                }
            })
            .collect())
    }

    /// Debit `amount` now and hold it until the operation settles
    pub async fn reserve(
        &self,
        organization_id: Uuid,
        amount: i64,
        transaction_type: TransactionType,
        meta: TransactionMeta,
    ) -> Result<Reservation> {
        let tx = self
            .deduct(organization_id, amount, transaction_type, meta)
            .await?;
        debug!(organization_id = %organization_id, amount = amount, reservation = %tx.id, "Credits reserved");
        Ok(Reservation {
            id: tx.id,
            organization_id,
            amount,
            transaction_type,
        })
    }

    /// Keep `actual` of the reservation and refund the rest
    pub async fn settle(&self, reservation: Reservation, actual: i64) -> Result<Option<CreditTransaction>> {
        if actual < 0 || actual > reservation.amount {
            return Err(AppError::InvalidRequest(format!(
                "Cannot settle reservation of {} at {}",
                reservation.amount, actual
            )));
        }

        let refund = reservation.amount - actual;
        if refund == 0 {
            return Ok(None);
        }

        let tx = self
            .store
            .apply(LedgerEntry::credit(
                reservation.organization_id,
                refund,
                TransactionType::Refund,
                TransactionMeta::note(format!("Refund of unused {:?} reservation", reservation.transaction_type))
                    .with_reference("credit_transaction", reservation.id),
            ))
            .await?;
        info!(organization_id = %reservation.organization_id, refund = refund, kept = actual, "Reservation settled");
        Ok(Some(tx))
    }

    /// Refund a reservation in full
    pub async fn release(&self, reservation: Reservation) -> Result<CreditTransaction> {
        let organization_id = reservation.organization_id;
        let amount = reservation.amount;
        let tx = self
            .settle(reservation, 0)
            .await?
            .ok_or_else(|| AppError::Internal("Empty reservation released".to_string()))?;
        info!(organization_id = %organization_id, amount = amount, "Reservation released");
        Ok(tx)
    }

    /// Reserve `amount`, run `op`, and release the reservation if `op` fails
    pub async fn charged<T, F>(
        &self,
        organization_id: Uuid,
        amount: i64,
        transaction_type: TransactionType,
        meta: TransactionMeta,
        op: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let reservation = self
            .reserve(organization_id, amount, transaction_type, meta)
            .await?;

        match op.await {
            Ok(value) => Ok(value),
            Err(err) => {
                if let Err(release_err) = self.release(reservation).await {
                    warn!(organization_id = %organization_id, error = %release_err, "Failed to release reservation");
                }
                Err(err)
            }
        }
    }
}
