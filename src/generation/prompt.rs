//! Prompt text for each side of a request

use crate::models::{CatalogItem, GenerationInput, Side};

/// Everything a prompt builder may draw on
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub input: &'a GenerationInput,
    pub product: &'a CatalogItem,
    pub model_profile: Option<&'a CatalogItem>,
    pub scene_preset: Option<&'a CatalogItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidePrompt {
    pub full_prompt: String,
    pub negative_prompt: Option<String>,
}

/// Pure function from request context to prompt text. `None` (or an empty
/// prompt) means the side cannot be generated.
pub trait PromptBuilder: Send + Sync {
    fn build(&self, ctx: &PromptContext<'_>, side: Side) -> Option<SidePrompt>;
}

/// Plain sentence template over catalog names and descriptions
#[derive(Debug, Default, Clone)]
pub struct TemplatePromptBuilder;

const NEGATIVE_PROMPT: &str = "blurry, distorted garment, extra limbs, watermark, text, low quality";

impl PromptBuilder for TemplatePromptBuilder {
    fn build(&self, ctx: &PromptContext<'_>, side: Side) -> Option<SidePrompt> {
        let product = ctx.product.name.trim();
        if product.is_empty() {
            return None;
        }

        let view = match side {
            Side::Front => "front view",
            Side::Back => "back view, showing the garment from behind",
        };

        let mut parts = vec![format!("Professional fashion photograph of {}, {}", product, view)];
        if let Some(description) = ctx.product.description.as_deref().filter(|d| !d.is_empty()) {
            parts.push(description.to_string());
        }
        if let Some(model) = ctx.model_profile {
            parts.push(format!("worn by {}", model.name));
        }
        if let Some(scene) = ctx.scene_preset {
            parts.push(format!("set in {}", scene.name));
        }
        if let Some(extra) = ctx.input.prompts.for_side(side).filter(|p| !p.trim().is_empty()) {
            parts.push(extra.trim().to_string());
        }
        parts.push(format!("aspect ratio {}, {} resolution", ctx.input.aspect_ratio, ctx.input.resolution));

        Some(SidePrompt {
            full_prompt: parts.join(", "),
            negative_prompt: Some(NEGATIVE_PROMPT.to_string()),
        })
    }
}
