//! Lookup table from provider kind to adapter

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::AdapterConfig;
use crate::error::Result;
use crate::provider::http_provider::HttpProvider;
use crate::provider::task_provider::TaskProvider;
use crate::provider::traits::ImageProvider;

/// Registry of provider adapters keyed by kind
#[derive(Default)]
pub struct ProviderRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn ImageProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `http` and `task` adapters
    pub fn with_builtin(config: &AdapterConfig) -> Result<Self> {
        let registry = Self::new();
        registry.register(Arc::new(HttpProvider::new()?));
        registry.register(Arc::new(TaskProvider::new(config.task_poll_interval())?));
        Ok(registry)
    }

    /// Register an adapter, replacing any previous one of the same kind
    pub fn register(&self, adapter: Arc<dyn ImageProvider>) {
        let kind = adapter.kind().to_string();
        info!(kind = %kind, "Registered provider adapter");
        self.adapters.write().insert(kind, adapter);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ImageProvider>> {
        self.adapters.read().get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.adapters.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }
}
