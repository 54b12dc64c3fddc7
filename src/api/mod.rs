//! Thin HTTP surface over the orchestration core

pub mod handlers;
pub mod routes;

pub use routes::create_router;
