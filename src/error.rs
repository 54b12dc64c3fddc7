//! Common error types for the generation orchestration core

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider timed out after {timeout_ms}ms: {provider}")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    #[error("Provider exhausted after {retries} attempts: {provider}: {last_error}")]
    ProviderExhausted {
        provider: String,
        retries: u32,
        last_error: String,
    },

    #[error("All providers failed after {attempts} attempts: {last_error}")]
    AllProvidersFailed {
        attempts: u32,
        failed_providers: Vec<String>,
        last_error: String,
    },

    #[error("No images were generated: {0}")]
    ZeroSuccessGeneration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response format (OpenAI compatible)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match &self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::Json(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", Some("invalid_json")),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, "provider_error", None),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found_error", Some("not_found")),
            AppError::InsufficientCredits { .. } => (StatusCode::PAYMENT_REQUIRED, "billing_error", Some("insufficient_credits")),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", None),
            AppError::Provider(_) => (StatusCode::BAD_GATEWAY, "provider_error", None),
            AppError::ProviderTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout_error", Some("provider_timeout")),
            AppError::ProviderExhausted { .. } => (StatusCode::BAD_GATEWAY, "provider_error", Some("provider_exhausted")),
            AppError::AllProvidersFailed { .. } => (StatusCode::SERVICE_UNAVAILABLE, "provider_error", Some("all_providers_failed")),
            AppError::ZeroSuccessGeneration(_) => (StatusCode::BAD_GATEWAY, "generation_error", Some("zero_success")),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: error_type.to_string(),
                code: code.map(|c| c.to_string()),
            },
        });

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
