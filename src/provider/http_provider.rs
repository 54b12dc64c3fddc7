//! Synchronous HTTP provider: one POST returns the finished image

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::provider::traits::{GenerationOptions, ImageProvider, ProviderConfig};

/// Request body shared by the HTTP-style provider APIs
#[derive(Debug, Serialize)]
pub(crate) struct ApiGenerateRequest<'a> {
    pub prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub aspect_ratio: &'a str,
    pub resolution: &'a str,
    pub quality: crate::models::QualityMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<&'a str>,
    pub n: u32,
    pub response_format: &'a str,
}

impl<'a> ApiGenerateRequest<'a> {
    pub(crate) fn new(config: &'a ProviderConfig, options: &'a GenerationOptions) -> Self {
        Self {
            prompt: &options.prompt,
            negative_prompt: options.negative_prompt.as_deref(),
            model: config.model.as_deref(),
            aspect_ratio: &options.aspect_ratio,
            resolution: &options.resolution,
            quality: options.quality_mode,
            image_url: options.reference_image_url.as_deref(),
            n: 1,
            response_format: "url",
        }
    }
}

/// Generic API response from HTTP providers
#[derive(Debug, Deserialize)]
struct ApiGenerateResponse {
    #[serde(default)]
    images: Vec<ApiImageData>,
    #[serde(default)]
    data: Vec<ApiImageData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiImageData {
    #[serde(default)]
    pub b64_json: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl ApiImageData {
    /// Image location; inline base64 payloads become data URLs
    pub(crate) fn into_url(self) -> Option<String> {
        match (self.url, self.b64_json) {
            (Some(url), _) if !url.is_empty() => Some(url),
            (_, Some(b64)) if STANDARD.decode(b64.trim()).is_ok() => {
                Some(format!("data:image/png;base64,{}", b64.trim()))
            }
            _ => None,
        }
    }
}

/// Provider that returns the image from a single request
pub struct HttpProvider {
    client: Client,
}

impl HttpProvider {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageProvider for HttpProvider {
    fn kind(&self) -> &str {
        "http"
    }

    async fn generate_image(
        &self,
        config: &ProviderConfig,
        options: &GenerationOptions,
    ) -> Result<String> {
        let url = format!("{}/v1/images/generations", config.endpoint);
        debug!(provider = %config.name, url = %url, side = %options.side, index = options.index, "Sending generate request");

        let mut request = self.client.post(&url).json(&ApiGenerateRequest::new(config, options));
        if let Some(key) = &config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "{} returned {}: {}",
                config.name, status, body
            )));
        }

        let api_response: ApiGenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("Failed to parse response: {}", e)))?;

        api_response
            .data
            .into_iter()
            .chain(api_response.images)
            .find_map(ApiImageData::into_url)
            .ok_or_else(|| AppError::Provider(format!("{} returned no image", config.name)))
    }
}
