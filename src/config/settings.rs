//! Application settings and configuration management

use crate::error::{AppError, Result};
use crate::models::QualityMode;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Provider kinds with a built-in adapter
pub const KNOWN_PROVIDER_KINDS: &[&str] = &["http", "task"];

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub adapters: AdapterConfig,
    #[serde(default)]
    pub providers: Vec<ProviderSeed>,
    #[serde(default)]
    pub accounts: Vec<AccountSeed>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Retry backoff for the fallback dispatcher
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    /// Max characters kept from a provider error in `failed_providers`
    #[serde(default = "default_error_truncate")]
    pub error_truncate: usize,
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_backoff_max() -> u64 {
    5000
}

fn default_error_truncate() -> usize {
    200
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            error_truncate: default_error_truncate(),
        }
    }
}

/// Provider health policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_min_samples() -> u64 {
    5
}

fn default_error_rate_threshold() -> f64 {
    0.5
}

fn default_cooldown() -> u64 {
    300
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            error_rate_threshold: default_error_rate_threshold(),
            cooldown_secs: default_cooldown(),
        }
    }
}

/// Job queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueSettings {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_queue_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Charge the ledger for queued work
    #[serde(default)]
    pub metered: bool,
}

fn default_concurrency() -> usize {
    3
}

fn default_queue_retries() -> u32 {
    3
}

fn default_retention() -> u64 {
    3600
}

fn default_tick_interval() -> u64 {
    1000
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_queue_retries(),
            retention_secs: default_retention(),
            tick_interval_ms: default_tick_interval(),
            metered: false,
        }
    }
}

/// Token cost per image for each quality tier
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct PricingConfig {
    #[serde(default = "default_fast_price")]
    pub fast: i64,
    #[serde(default = "default_standard_price")]
    pub standard: i64,
    #[serde(default = "default_high_price")]
    pub high: i64,
}

fn default_fast_price() -> i64 {
    3
}

fn default_standard_price() -> i64 {
    5
}

fn default_high_price() -> i64 {
    8
}

impl PricingConfig {
    pub fn tokens_per_image(&self, mode: QualityMode) -> i64 {
        match mode {
            QualityMode::Fast => self.fast,
            QualityMode::Standard => self.standard,
            QualityMode::High => self.high,
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            fast: default_fast_price(),
            standard: default_standard_price(),
            high: default_high_price(),
        }
    }
}

/// Limits applied when a generation request is planned
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct GenerationSettings {
    /// Upper bound on `front_count + back_count`
    #[serde(default = "default_max_images")]
    pub max_images_per_request: u32,
}

fn default_max_images() -> u32 {
    20
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_images_per_request: default_max_images(),
        }
    }
}

/// Settings for the built-in provider adapters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdapterConfig {
    /// Delay between status polls of the `task` adapter
    #[serde(default = "default_task_poll_interval")]
    pub task_poll_interval_ms: u64,
}

fn default_task_poll_interval() -> u64 {
    2000
}

impl AdapterConfig {
    pub fn task_poll_interval(&self) -> Duration {
        Duration::from_millis(self.task_poll_interval_ms)
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            task_poll_interval_ms: default_task_poll_interval(),
        }
    }
}

/// Provider configuration seeded into the provider store at startup
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderSeed {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Owning organization; absent means global fallback
    #[serde(default)]
    pub organization_id: Option<Uuid>,
    #[serde(default)]
    pub priority: i32,
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_provider_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_kind() -> String {
    "http".to_string()
}

fn default_provider_retries() -> u32 {
    3
}

fn default_timeout() -> u64 {
    60000
}

/// Initial credit balance for an organization
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountSeed {
    pub organization_id: Uuid,
    #[serde(default)]
    pub credits: i64,
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            // Load from configuration file
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables (prefixed with GEN_ORCH_)
            .add_source(
                Environment::with_prefix("GEN_ORCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0".to_string()));
        }

        if self.queue.concurrency == 0 {
            return Err(invalid("Queue concurrency must be at least 1".to_string()));
        }

        if self.queue.tick_interval_ms == 0 {
            return Err(invalid("Queue tick interval must be at least 1ms".to_string()));
        }

        if self.generation.max_images_per_request == 0 {
            return Err(invalid("Max images per request must be at least 1".to_string()));
        }

        if self.adapters.task_poll_interval_ms == 0 {
            return Err(invalid("Task poll interval must be at least 1ms".to_string()));
        }

        if self.dispatcher.backoff_base_ms > self.dispatcher.backoff_max_ms {
            return Err(invalid(format!(
                "Backoff base {}ms exceeds backoff max {}ms",
                self.dispatcher.backoff_base_ms, self.dispatcher.backoff_max_ms
            )));
        }

        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(invalid("Provider name cannot be empty".to_string()));
            }
            if provider.endpoint.is_empty() {
                return Err(invalid(format!(
                    "Provider '{}' must have an endpoint",
                    provider.name
                )));
            }
            if !KNOWN_PROVIDER_KINDS.contains(&provider.kind.as_str()) {
                return Err(invalid(format!(
                    "Provider '{}' has invalid kind '{}'. Must be one of {:?}",
                    provider.name, provider.kind, KNOWN_PROVIDER_KINDS
                )));
            }
        }

        for account in &self.accounts {
            if account.credits < 0 {
                return Err(invalid(format!(
                    "Account {} cannot start with negative credits",
                    account.organization_id
                )));
            }
        }

        Ok(())
    }
}

fn invalid(message: String) -> AppError {
    AppError::Config(config::ConfigError::Message(message))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
            },
            logging: LoggingConfig {
                level: default_log_level(),
                format: default_log_format(),
            },
            dispatcher: DispatcherConfig::default(),
            health: HealthConfig::default(),
            queue: QueueSettings::default(),
            pricing: PricingConfig::default(),
            generation: GenerationSettings::default(),
            adapters: AdapterConfig::default(),
            providers: vec![],
            accounts: vec![],
        }
    }
}
