//! Request planning shared by the synchronous coordinator and the job queue

pub mod coordinator;
pub mod prompt;

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::config::{GenerationSettings, PricingConfig};
use crate::error::{AppError, Result};
use crate::models::{CatalogItem, GenerationInput, Side};
use crate::provider::GenerationOptions;
use crate::store::{CatalogKind, CatalogStore};

pub use coordinator::{GenerationCoordinator, GenerationOutcome};
pub use prompt::{PromptBuilder, PromptContext, SidePrompt, TemplatePromptBuilder};

/// A validated request with its prompts and price resolved
#[derive(Debug, Clone)]
pub struct GenerationPlan {
    pub input: GenerationInput,
    pub tokens_per_image: i64,
    pub prompts: BTreeMap<Side, SidePrompt>,
    pub reference_image_url: Option<String>,
}

impl GenerationPlan {
    /// Cost if every requested image is produced
    pub fn total_cost(&self) -> i64 {
        self.input.total() as i64 * self.tokens_per_image
    }

    pub fn cost_of(&self, produced: u32) -> i64 {
        produced as i64 * self.tokens_per_image
    }

    /// Sides with at least one image requested, front first
    pub fn sides(&self) -> impl Iterator<Item = (Side, u32)> + '_ {
        [Side::Front, Side::Back]
            .into_iter()
            .map(|side| (side, self.input.count_for(side)))
            .filter(|(_, count)| *count > 0)
    }

    pub fn options(&self, side: Side, index: u32) -> Result<GenerationOptions> {
        let prompt = self
            .prompts
            .get(&side)
            .ok_or_else(|| AppError::InvalidRequest(format!("no prompt for {} side", side)))?;

        Ok(GenerationOptions {
            prompt: prompt.full_prompt.clone(),
            negative_prompt: prompt.negative_prompt.clone(),
            aspect_ratio: self.input.aspect_ratio.clone(),
            resolution: self.input.resolution.clone(),
            quality_mode: self.input.quality_mode,
            side,
            index,
            reference_image_url: self.reference_image_url.clone(),
        })
    }
}

/// Validates ownership, prices the request and builds per-side prompts
pub struct GenerationPlanner {
    catalog: Arc<dyn CatalogStore>,
    prompts: Arc<dyn PromptBuilder>,
    pricing: PricingConfig,
    max_images: u32,
}

impl GenerationPlanner {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        prompts: Arc<dyn PromptBuilder>,
        pricing: PricingConfig,
        limits: GenerationSettings,
    ) -> Self {
        Self {
            catalog,
            prompts,
            pricing,
            max_images: limits.max_images_per_request,
        }
    }

    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    /// Resolve a catalog reference the organization may use
    async fn resolve(&self, kind: CatalogKind, id: Uuid, organization_id: Uuid) -> Result<CatalogItem> {
        self.catalog
            .find(kind, id)
            .await?
            .filter(|item| item.visible_to(organization_id))
            .ok_or_else(|| AppError::NotFound(format!("{} {}", kind, id)))
    }

    pub async fn plan(&self, input: &GenerationInput) -> Result<GenerationPlan> {
        let total = input.total();
        if total == 0 {
            return Err(AppError::InvalidRequest(
                "at least one front or back image must be requested".to_string(),
            ));
        }
        if total > u64::from(self.max_images) {
            return Err(AppError::InvalidRequest(format!(
                "{} images requested, at most {} allowed per request",
                total, self.max_images
            )));
        }

        let org = input.organization_id;
        let product = self.resolve(CatalogKind::Product, input.product_id, org).await?;
        let model_profile = match input.model_profile_id {
            Some(id) => Some(self.resolve(CatalogKind::ModelProfile, id, org).await?),
            None => None,
        };
        let scene_preset = match input.scene_preset_id {
            Some(id) => Some(self.resolve(CatalogKind::ScenePreset, id, org).await?),
            None => None,
        };

        let ctx = PromptContext {
            input,
            product: &product,
            model_profile: model_profile.as_ref(),
            scene_preset: scene_preset.as_ref(),
        };

        let mut prompts = BTreeMap::new();
        for side in [Side::Front, Side::Back] {
            if input.count_for(side) == 0 {
                continue;
            }
            match self.prompts.build(&ctx, side) {
                Some(prompt) if !prompt.full_prompt.trim().is_empty() => {
                    prompts.insert(side, prompt);
                }
                _ => {
                    return Err(AppError::InvalidRequest(format!(
                        "could not build a prompt for the {} side",
                        side
                    )))
                }
            }
        }

        let tokens_per_image = self.pricing.tokens_per_image(input.quality_mode);
        debug!(
            organization_id = %org,
            total = total,
            tokens_per_image = tokens_per_image,
            "Generation planned"
        );

        Ok(GenerationPlan {
            input: input.clone(),
            tokens_per_image,
            prompts,
            reference_image_url: product.image_url.clone(),
        })
    }
}
