//! # Configuration Management for QueryHaus
//!
//! This crate provides centralized configuration structures for all QueryHaus components,
//! including the cache store, the query runner, the mutation coordinator and the signal system.
//!
//! ## Quick Start
//!
//! ### Programmatic Configuration
//! ```rust
//! use config::{CacheConfig, QueryConfig};
//!
//! // Entries stay fresh for 30 seconds and are collected 5 minutes after
//! // their last subscriber leaves
//! let cache_config = CacheConfig::new(30_000, 300_000, 256);
//!
//! // Two read retries starting at one second
//! let query_config = QueryConfig::new(2, 1_000, 30_000, true);
//! ```
//!
//! ### TOML File Configuration
//! ```toml
//! [cache]
//! default_stale_after_ms = 0
//! default_gc_after_ms = 300000
//! change_feed_capacity = 256
//!
//! [query]
//! max_retries = 2
//! initial_backoff_ms = 1000
//! max_backoff_ms = 30000
//! jitter = true
//!
//! [mutation]
//! notify_success = true
//! rollback_notice = "{label} failed, changes were rolled back: {error}"
//!
//! [signal]
//! max_callbacks = 64
//! ```
//!
//! Load configuration:
//! ```rust,no_run
//! use config::AppConfig;
//!
//! // Load from queryhaus.toml
//! let config = AppConfig::load()?;
//!
//! // Or load from custom path
//! let config = AppConfig::from_file("config/production.toml")?;
//! # Ok::<(), config::ConfigError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{env, path::Path};
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "./queryhaus.toml";
const CONFIG_PATH_ENV: &str = "QUERYHAUS_CONFIG";

const DEFAULT_STALE_AFTER_MS: u64 = 0;
const DEFAULT_GC_AFTER_MS: u64 = 300_000;
const DEFAULT_CHANGE_FEED_CAPACITY: usize = 256;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
const DEFAULT_MAX_CALLBACKS: usize = 64;
const DEFAULT_ROLLBACK_NOTICE: &str = "{label} failed, changes were rolled back: {error}";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Environment variable error: {0}")]
    Env(#[from] env::VarError),
    #[error("Dotenvy error: {0}")]
    Dotenvy(#[from] dotenvy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub query: QueryConfig,
    pub mutation: MutationConfig,
    pub signal: SignalConfig,
}

/// Cache store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Freshness window for resources without their own policy
    pub default_stale_after_ms: u64,
    /// Time an unsubscribed entry is kept before collection
    pub default_gc_after_ms: u64,
    /// Buffered change notifications per receiver
    pub change_feed_capacity: usize,
}

/// Read path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Retries after the first failed fetch
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Randomize each backoff delay within [delay / 2, delay]
    pub jitter: bool,
}

/// Write path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    /// Emit a success notice when a mutation settles successfully
    pub notify_success: bool,
    /// Template for the failure notice; `{label}` and `{error}` are substituted
    pub rollback_notice: String,
}

/// Signal system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub max_callbacks: usize,
}

impl AppConfig {
    /// Load configuration from the TOML file named in the environment or the default path
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env file is fine, a malformed one is not
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(err) if err.not_found() => {}
            Err(err) => return Err(err.into()),
        }

        let config = if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
            Self::from_file(&config_path)
        } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::from_file(DEFAULT_CONFIG_PATH)
        } else {
            Err(ConfigError::Invalid(format!(
                "Config path must be specified in .env file as {} or in {} file",
                CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH
            )))
        }?;

        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.change_feed_capacity == 0 {
            return Err(ConfigError::Invalid(
                "Cache change_feed_capacity must be greater than 0".to_string(),
            ));
        }

        if self.query.initial_backoff_ms == 0 {
            return Err(ConfigError::Invalid(
                "Query initial_backoff_ms must be greater than 0".to_string(),
            ));
        }
        if self.query.max_backoff_ms < self.query.initial_backoff_ms {
            return Err(ConfigError::Invalid(
                "Query max_backoff_ms cannot be less than initial_backoff_ms".to_string(),
            ));
        }

        if self.mutation.rollback_notice.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "Mutation rollback_notice cannot be empty".to_string(),
            ));
        }

        if self.signal.max_callbacks == 0 {
            return Err(ConfigError::Invalid(
                "Signal max_callbacks must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl CacheConfig {
    /// Create a new cache configuration
    pub fn new(
        default_stale_after_ms: u64,
        default_gc_after_ms: u64,
        change_feed_capacity: usize,
    ) -> Self {
        Self {
            default_stale_after_ms,
            default_gc_after_ms,
            change_feed_capacity,
        }
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.default_stale_after_ms)
    }

    pub fn gc_after(&self) -> Duration {
        Duration::from_millis(self.default_gc_after_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_STALE_AFTER_MS,
            DEFAULT_GC_AFTER_MS,
            DEFAULT_CHANGE_FEED_CAPACITY,
        )
    }
}

impl QueryConfig {
    /// Create a new query configuration
    pub fn new(max_retries: u32, initial_backoff_ms: u64, max_backoff_ms: u64, jitter: bool) -> Self {
        Self {
            max_retries,
            initial_backoff_ms,
            max_backoff_ms,
            jitter,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            DEFAULT_INITIAL_BACKOFF_MS,
            DEFAULT_MAX_BACKOFF_MS,
            true,
        )
    }
}

impl MutationConfig {
    /// Render the failure notice for a mutation
    pub fn render_rollback_notice(&self, label: &str, error: &str) -> String {
        self.rollback_notice
            .replace("{label}", label)
            .replace("{error}", error)
    }
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            notify_success: true,
            rollback_notice: DEFAULT_ROLLBACK_NOTICE.to_string(),
        }
    }
}

impl SignalConfig {
    /// Create a new signal configuration
    pub fn new(max_callbacks: usize) -> Self {
        Self { max_callbacks }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CALLBACKS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.query.max_retries, 2);
        assert_eq!(config.cache.default_stale_after_ms, 0);
        assert_eq!(config.cache.gc_after(), Duration::from_secs(300));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [cache]
            default_stale_after_ms = 300000

            [query]
            max_retries = 4
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.cache.stale_after(), Duration::from_secs(300));
        assert_eq!(config.cache.change_feed_capacity, 256);
        assert_eq!(config.query.max_retries, 4);
        assert_eq!(config.query.initial_backoff_ms, 1_000);
        assert!(config.mutation.notify_success);
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let result = AppConfig::from_toml_str(
            r#"
            [query]
            initial_backoff_ms = 5000
            max_backoff_ms = 100
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_feed_capacity() {
        let mut config = AppConfig::default();
        config.cache.change_feed_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn renders_rollback_notice() {
        let config = MutationConfig::default();
        assert_eq!(
            config.render_rollback_notice("Update settings", "timeout"),
            "Update settings failed, changes were rolled back: timeout"
        );
    }
}
