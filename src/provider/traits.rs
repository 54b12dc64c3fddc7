//! Common traits and types for image generation providers

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ProviderSeed;
use crate::error::Result;
use crate::models::{QualityMode, Side};

/// Inputs for producing a single image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Full prompt text for this side
    pub prompt: String,

    /// Negative prompt (things to avoid)
    pub negative_prompt: Option<String>,

    pub aspect_ratio: String,

    pub resolution: String,

    pub quality_mode: QualityMode,

    pub side: Side,

    /// Position of the image within its side
    pub index: u32,

    /// Product photo the image is conditioned on
    pub reference_image_url: Option<String>,
}

/// Persisted provider configuration plus its rolling health counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: Uuid,
    pub name: String,
    /// Registry key of the adapter that talks to this provider
    pub kind: String,
    /// Owning organization; `None` marks a global fallback provider
    pub organization_id: Option<Uuid>,
    /// Ascending, lower is tried first
    pub priority: i32,
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub active: bool,
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Running mean over successful calls only
    pub avg_response_ms: f64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl ProviderConfig {
    pub fn from_seed(seed: &ProviderSeed) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: seed.name.clone(),
            kind: seed.kind.clone(),
            organization_id: seed.organization_id,
            priority: seed.priority,
            endpoint: seed.endpoint.trim_end_matches('/').to_string(),
            api_key: seed.api_key.clone(),
            model: seed.model.clone(),
            active: seed.active,
            max_retries: seed.max_retries,
            timeout_ms: seed.timeout_ms,
            success_count: 0,
            error_count: 0,
            avg_response_ms: 0.0,
            last_error: None,
            last_error_at: None,
        }
    }

    pub fn total_calls(&self) -> u64 {
        self.success_count + self.error_count
    }

    pub fn error_rate(&self) -> f64 {
        let total = self.total_calls();
        if total == 0 {
            0.0
        } else {
            self.error_count as f64 / total as f64
        }
    }

    pub fn is_global(&self) -> bool {
        self.organization_id.is_none()
    }
}

/// Which providers a lookup should return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderScope {
    Organization(Uuid),
    Global,
}

/// Adapter for one family of image generation backends
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Registry key, matched against `ProviderConfig::kind`
    fn kind(&self) -> &str;

    /// Produce one image and return its URL. Implementations may be a single
    /// call or a create-then-poll protocol; the caller bounds the duration.
    async fn generate_image(
        &self,
        config: &ProviderConfig,
        options: &GenerationOptions,
    ) -> Result<String>;
}
