//! Gateway module - provider health tracking and fallback dispatch

pub mod dispatcher;
pub mod health_check;

pub use dispatcher::{Backoff, DispatchOutcome, FallbackDispatcher};
pub use health_check::{HealthPolicy, HealthTracker, ProviderHealth};
