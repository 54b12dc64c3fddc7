//! Domain types shared by the coordinator, the job queue and the stores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Which view of the product an image shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Front,
    Back,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Front => "front",
            Side::Back => "back",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality tier, controls the token cost of each image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
pub enum QualityMode {
    Fast,
    Standard,
    High,
}

impl QualityMode {
    /// Lenient parse; unknown tiers are billed as standard.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "FAST" => Self::Fast,
            "HIGH" => Self::High,
            _ => Self::Standard,
        }
    }
}

impl From<String> for QualityMode {
    fn from(s: String) -> Self {
        Self::parse_lenient(&s)
    }
}

impl Default for QualityMode {
    fn default() -> Self {
        Self::Standard
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationStatus {
    /// Only used by the queued path while jobs are outstanding
    Processing,
    Done,
    Error,
}

/// Optional user-supplied prompt text per side
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptOverrides {
    #[serde(default)]
    pub front: Option<String>,
    #[serde(default)]
    pub back: Option<String>,
}

impl PromptOverrides {
    pub fn for_side(&self, side: Side) -> Option<&str> {
        match side {
            Side::Front => self.front.as_deref(),
            Side::Back => self.back.as_deref(),
        }
    }
}

/// Inbound generation request, already authenticated and shape-validated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationInput {
    pub organization_id: Uuid,
    pub product_id: Uuid,
    #[serde(default)]
    pub model_profile_id: Option<Uuid>,
    #[serde(default)]
    pub scene_preset_id: Option<Uuid>,
    #[serde(default)]
    pub front_count: u32,
    #[serde(default)]
    pub back_count: u32,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default)]
    pub quality_mode: QualityMode,
    #[serde(default)]
    pub prompts: PromptOverrides,
}

fn default_aspect_ratio() -> String {
    "3:4".to_string()
}

fn default_resolution() -> String {
    "1K".to_string()
}

impl GenerationInput {
    /// Requested image count, widened so two `u32` counts cannot overflow
    pub fn total(&self) -> u64 {
        u64::from(self.front_count) + u64::from(self.back_count)
    }

    pub fn count_for(&self, side: Side) -> u32 {
        match side {
            Side::Front => self.front_count,
            Side::Back => self.back_count,
        }
    }
}

/// Aggregate for one user action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub product_id: Uuid,
    pub model_profile_id: Option<Uuid>,
    pub scene_preset_id: Option<Uuid>,
    pub front_count: u32,
    pub back_count: u32,
    pub aspect_ratio: String,
    pub resolution: String,
    pub quality_mode: QualityMode,
    pub status: GenerationStatus,
    pub front_error: Option<String>,
    pub back_error: Option<String>,
    pub credits_consumed: i64,
    pub created_at: DateTime<Utc>,
}

impl GenerationRequest {
    /// Build a fresh request row from the inbound input
    pub fn from_input(input: &GenerationInput, status: GenerationStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id: input.organization_id,
            product_id: input.product_id,
            model_profile_id: input.model_profile_id,
            scene_preset_id: input.scene_preset_id,
            front_count: input.front_count,
            back_count: input.back_count,
            aspect_ratio: input.aspect_ratio.clone(),
            resolution: input.resolution.clone(),
            quality_mode: input.quality_mode,
            status,
            front_error: None,
            back_error: None,
            credits_consumed: 0,
            created_at: Utc::now(),
        }
    }

    pub fn expected_images(&self) -> u64 {
        u64::from(self.front_count) + u64::from(self.back_count)
    }

    pub fn set_error(&mut self, side: Side, message: String) {
        match side {
            Side::Front => self.front_error = Some(message),
            Side::Back => self.back_error = Some(message),
        }
    }

    /// Per-side errors keyed by side name
    pub fn errors(&self) -> BTreeMap<Side, String> {
        let mut errors = BTreeMap::new();
        if let Some(e) = &self.front_error {
            errors.insert(Side::Front, e.clone());
        }
        if let Some(e) = &self.back_error {
            errors.insert(Side::Back, e.clone());
        }
        errors
    }
}

/// One output artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: Uuid,
    pub request_id: Uuid,
    pub side: Side,
    pub index: u32,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl GeneratedImage {
    pub fn new(request_id: Uuid, side: Side, index: u32, url: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            side,
            index,
            url,
            created_at: Utc::now(),
        }
    }
}

/// Product, model profile or scene preset referenced by a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: Uuid,
    /// `None` marks a shared/global entry usable by every organization
    pub organization_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl CatalogItem {
    pub fn visible_to(&self, organization_id: Uuid) -> bool {
        self.organization_id.map_or(true, |owner| owner == organization_id)
    }
}
