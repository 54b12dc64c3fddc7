//! Router construction

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/generations", post(handlers::create_generation))
        .route("/v1/generations/queued", post(handlers::queue_generation))
        .route("/v1/generations/:id", get(handlers::get_generation))
        .route("/v1/credits/:organization_id", get(handlers::get_balance))
        .route("/v1/credits/:organization_id/history", get(handlers::get_history))
        .route("/admin/providers", get(handlers::list_providers))
        .route("/admin/providers/:id/reset", post(handlers::reset_provider))
        .route("/admin/queue/sweep", post(handlers::sweep_jobs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
