//! Synchronous generation with pay-for-success billing
//!
//! Images are produced one at a time, front side first, each through the
//! fallback dispatcher. The first failure on a side stops that side only.
//! Nothing is persisted or charged unless at least one image exists, and the
//! charge is always the produced count times the per-image price.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::gateway::FallbackDispatcher;
use crate::generation::GenerationPlanner;
use crate::ledger::{CreditLedger, LedgerEntry, TransactionMeta, TransactionType};
use crate::models::{GeneratedImage, GenerationInput, GenerationRequest, GenerationStatus, Side};
use crate::store::GenerationStore;

/// Result of a request where at least one image was produced
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub request: GenerationRequest,
    pub images: Vec<GeneratedImage>,
    /// Per-side failure messages; empty when everything succeeded
    pub errors: BTreeMap<Side, String>,
    pub credits_charged: i64,
}

pub struct GenerationCoordinator {
    planner: Arc<GenerationPlanner>,
    dispatcher: Arc<FallbackDispatcher>,
    ledger: Arc<CreditLedger>,
    generations: Arc<dyn GenerationStore>,
}

impl GenerationCoordinator {
    pub fn new(
        planner: Arc<GenerationPlanner>,
        dispatcher: Arc<FallbackDispatcher>,
        ledger: Arc<CreditLedger>,
        generations: Arc<dyn GenerationStore>,
    ) -> Self {
        Self {
            planner,
            dispatcher,
            ledger,
            generations,
        }
    }

    pub async fn generate(&self, input: GenerationInput) -> Result<GenerationOutcome> {
        let plan = self.planner.plan(&input).await?;
        let org = input.organization_id;

        let needed = plan.total_cost();
        let available = self.ledger.get_balance(org).await?;
        if available < needed {
            warn!(organization_id = %org, needed = needed, available = available, "Rejected generation: insufficient credits");
            return Err(AppError::InsufficientCredits {
                required: needed,
                available,
            });
        }

        let request_id = Uuid::new_v4();
        let mut images = Vec::new();
        let mut errors = BTreeMap::new();

        for (side, count) in plan.sides() {
            for index in 0..count {
                let options = plan.options(side, index)?;
                match self.dispatcher.dispatch(org, &options).await {
                    Ok(outcome) => {
                        images.push(GeneratedImage::new(request_id, side, index, outcome.image_url));
                    }
                    Err(e) => {
                        warn!(
                            organization_id = %org,
                            side = %side,
                            index = index,
                            error = %e,
                            "Stopping side after failed image"
                        );
                        errors.insert(
                            side,
                            format!("Failed to generate {} image {} of {}: {}", side, index + 1, count, e),
                        );
                        break;
                    }
                }
            }
        }

        if images.is_empty() {
            let message = errors.values().cloned().collect::<Vec<_>>().join("; ");
            warn!(organization_id = %org, "No images generated, nothing charged");
            return Err(AppError::ZeroSuccessGeneration(message));
        }

        let produced = images.len() as u32;
        let actual = plan.cost_of(produced);

        let status = if errors.is_empty() {
            GenerationStatus::Done
        } else {
            GenerationStatus::Error
        };
        let mut request = GenerationRequest::from_input(&input, status);
        request.id = request_id;
        request.credits_consumed = actual;
        for (side, message) in &errors {
            request.set_error(*side, message.clone());
        }

        let charge = LedgerEntry::debit(
            org,
            actual,
            TransactionType::Generation,
            TransactionMeta::note(format!(
                "Generated {} of {} images ({:?})",
                produced,
                input.total(),
                input.quality_mode
            ))
            .with_reference("generation_request", request_id),
        );

        let request = self
            .generations
            .commit_generation(charge, request, images.clone())
            .await?;

        info!(
            organization_id = %org,
            request_id = %request_id,
            produced = produced,
            requested = input.total(),
            credits = actual,
            status = ?request.status,
            "Generation committed"
        );

        Ok(GenerationOutcome {
            request,
            images,
            errors,
            credits_charged: actual,
        })
    }
}
