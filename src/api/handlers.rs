//! Request handlers for the service and admin endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::gateway::ProviderHealth;
use crate::generation::GenerationOutcome;
use crate::ledger::HistoryEntry;
use crate::models::{GeneratedImage, GenerationInput, GenerationRequest};
use crate::queue::{QueueJob, SubmittedGeneration};
use crate::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let (total, healthy, unhealthy) = state.health.summary().await?;
    let queue = state.queue.stats().await?;
    Ok(Json(json!({
        "status": "ok",
        "providers": {
            "total": total,
            "healthy": healthy,
            "unhealthy": unhealthy,
        },
        "queue": queue,
    })))
}

pub async fn create_generation(
    State(state): State<Arc<AppState>>,
    Json(input): Json<GenerationInput>,
) -> Result<(StatusCode, Json<GenerationOutcome>)> {
    let outcome = state.coordinator.generate(input).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn queue_generation(
    State(state): State<Arc<AppState>>,
    Json(input): Json<GenerationInput>,
) -> Result<(StatusCode, Json<SubmittedGeneration>)> {
    let submitted = state.queue.submit(input).await?;
    Ok((StatusCode::ACCEPTED, Json(submitted)))
}

#[derive(Serialize)]
pub struct GenerationView {
    pub request: GenerationRequest,
    pub images: Vec<GeneratedImage>,
    pub jobs: Vec<QueueJob>,
}

pub async fn get_generation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<GenerationView>> {
    let request = state.stores.generations.get_request(id).await?;
    let images = state.stores.generations.list_images(id).await?;
    let jobs = state.queue.jobs_for(id).await?;
    Ok(Json(GenerationView {
        request,
        images,
        jobs,
    }))
}

pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(organization_id): Path<Uuid>,
) -> Result<Json<Value>> {
    let remaining = state.ledger.get_balance(organization_id).await?;
    Ok(Json(json!({
        "organization_id": organization_id,
        "remaining_credits": remaining,
    })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    50
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(organization_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryEntry>>> {
    let history = state
        .ledger
        .history(organization_id, query.limit.min(500))
        .await?;
    Ok(Json(history))
}

pub async fn list_providers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ProviderHealth>>> {
    Ok(Json(state.health.snapshot().await?))
}

pub async fn reset_provider(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProviderHealth>> {
    Ok(Json(state.health.reset(id).await?))
}

pub async fn sweep_jobs(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let removed = state.queue.sweep().await?;
    Ok(Json(json!({ "removed": removed })))
}
