//! Provider module - adapter trait, HTTP and task-polling adapters, and registry

pub mod http_provider;
pub mod registry;
pub mod task_provider;
pub mod traits;

pub use registry::ProviderRegistry;
pub use traits::{GenerationOptions, ImageProvider, ProviderConfig, ProviderScope};
