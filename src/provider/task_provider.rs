//! Asynchronous task provider: create a task, then poll until it settles

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::provider::http_provider::{ApiGenerateRequest, ApiImageData};
use crate::provider::traits::{GenerationOptions, ImageProvider, ProviderConfig};

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    #[serde(alias = "task_id")]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TaskState {
    #[serde(alias = "queued")]
    Pending,
    #[serde(alias = "processing")]
    Running,
    #[serde(alias = "completed")]
    Succeeded,
    Failed,
}

#[derive(Debug, Deserialize)]
struct TaskStatusResponse {
    status: TaskState,
    #[serde(default)]
    output: Option<ApiImageData>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Provider speaking a create-task-then-poll protocol. Polling has no bound of
/// its own; the dispatcher's per-attempt timeout ends it.
pub struct TaskProvider {
    client: Client,
    poll_interval: Duration,
}

impl TaskProvider {
    pub fn new(poll_interval: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, poll_interval))
    }

    pub fn with_client(client: Client, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    async fn create_task(&self, config: &ProviderConfig, options: &GenerationOptions) -> Result<String> {
        let url = format!("{}/v1/tasks", config.endpoint);
        let mut request = self.client.post(&url).json(&ApiGenerateRequest::new(config, options));
        if let Some(key) = &config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "{} rejected task: {}: {}",
                config.name, status, body
            )));
        }

        let created: CreateTaskResponse = response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("Failed to parse task response: {}", e)))?;
        Ok(created.id)
    }

    async fn poll_task(&self, config: &ProviderConfig, task_id: &str) -> Result<TaskStatusResponse> {
        let url = format!("{}/v1/tasks/{}", config.endpoint, task_id);
        let mut request = self.client.get(&url);
        if let Some(key) = &config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AppError::Provider(format!(
                "{} task {} poll returned {}",
                config.name,
                task_id,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("Failed to parse task status: {}", e)))
    }
}

#[async_trait]
impl ImageProvider for TaskProvider {
    fn kind(&self) -> &str {
        "task"
    }

    async fn generate_image(
        &self,
        config: &ProviderConfig,
        options: &GenerationOptions,
    ) -> Result<String> {
        let task_id = self.create_task(config, options).await?;
        debug!(provider = %config.name, task_id = %task_id, "Task created");

        loop {
            let status = self.poll_task(config, &task_id).await?;
            match status.status {
                TaskState::Succeeded => {
                    return status
                        .url
                        .filter(|u| !u.is_empty())
                        .or_else(|| status.output.and_then(ApiImageData::into_url))
                        .ok_or_else(|| {
                            AppError::Provider(format!(
                                "{} task {} succeeded without an image",
                                config.name, task_id
                            ))
                        });
                }
                TaskState::Failed => {
                    return Err(AppError::Provider(format!(
                        "{} task {} failed: {}",
                        config.name,
                        task_id,
                        status.error.unwrap_or_else(|| "unknown error".to_string())
                    )));
                }
                TaskState::Pending | TaskState::Running => {
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}
