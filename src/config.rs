//! Configuration management for sharedlimit.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{RateLimitError, Result};

/// Environment variable prefix for configuration overrides, e.g. `SHAREDLIMIT__STORE__URL`.
const ENV_PREFIX: &str = "SHAREDLIMIT";

/// Main configuration for a rate limiter process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedLimitConfig {
    /// Shared store connection settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Storage key naming
    #[serde(default)]
    pub keys: KeyConfig,

    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Shared store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Connection URL of the store
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Upper bound on a single store round trip, in milliseconds
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,

    /// Upper bound on establishing the connection, in milliseconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            response_timeout_ms: default_response_timeout(),
            connection_timeout_ms: default_connection_timeout(),
        }
    }
}

impl StoreConfig {
    /// Response timeout as a `Duration`.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Connection timeout as a `Duration`.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_response_timeout() -> u64 {
    1000
}

fn default_connection_timeout() -> u64 {
    1000
}

/// Storage key naming configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Fixed category every storage key starts with
    #[serde(default = "default_category")]
    pub category: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            category: default_category(),
        }
    }
}

fn default_category() -> String {
    crate::ratelimit::DEFAULT_CATEGORY.to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON formatted log lines
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl SharedLimitConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SharedLimitConfig =
            serde_yaml::from_str(yaml).map_err(|e| RateLimitError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, then `SHAREDLIMIT__*` environment variables.
    ///
    /// Environment variables take precedence over the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

        let config: SharedLimitConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RateLimitError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no limiter can run with.
    pub fn validate(&self) -> Result<()> {
        if self.store.url.trim().is_empty() {
            return Err(RateLimitError::Config("store.url must not be empty".into()));
        }
        if self.store.response_timeout_ms == 0 || self.store.connection_timeout_ms == 0 {
            return Err(RateLimitError::Config(
                "store timeouts must be greater than zero".into(),
            ));
        }
        if self.keys.category.is_empty() || self.keys.category.contains(char::is_whitespace) {
            return Err(RateLimitError::Config(
                "keys.category must be non-empty and contain no whitespace".into(),
            ));
        }
        Ok(())
    }
}
