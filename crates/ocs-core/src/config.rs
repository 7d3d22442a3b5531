//! Application configuration
//!
//! Centralized configuration management using the `config` crate.
//! Values come from built-in defaults, optional `config/default` and
//! `config/{RUN_MODE}` files, then `OCS__*` environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tracing::debug;

/// Main application configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Charging engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Tenant applied to events and admin calls that carry none
    #[serde(default = "default_tenant")]
    pub default_tenant: String,

    /// Deadline applied to calls without an explicit one, in milliseconds
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
}

fn default_tenant() -> String {
    "cgrates.org".to_string()
}

fn default_lock_timeout() -> u64 {
    5000
}

impl EngineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_tenant: default_tenant(),
            lock_timeout_ms: default_lock_timeout(),
        }
    }
}

/// Which account store backs the engine
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process map, lost on restart
    #[default]
    Memory,
    /// Redis, shared between engine instances
    Redis,
}

/// Account store configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL, required for the redis backend
    pub redis_url: Option<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config files
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());
        debug!("Loading configuration for run mode {}", run_mode);

        let config = Config::builder()
            // Start with default values
            .set_default("engine.default_tenant", default_tenant())?
            .set_default("engine.lock_timeout_ms", default_lock_timeout())?
            .set_default("store.backend", "memory")?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.json", false)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with OCS_ prefix
            .add_source(
                Environment::with_prefix("OCS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Checks cross-field requirements that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_none() {
            return Err(ConfigError::Message(
                "store.redis_url is required for the redis backend".to_string(),
            ));
        }
        if self.engine.lock_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "engine.lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
