//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Config(err.to_string())
    }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    /// - `display_scale` is not 1, 2 or 3
    /// - `max_concurrent_downloads` is 0 or exceeds 64
    /// - `memory_cache_max_cost` is 0
    ///
    /// Returns `ConfigError::Missing` if `cache_dir` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing {
                field: "cache_dir".into(),
                hint: "Set PERMACACHE_CACHE_DIR environment variable".into(),
            });
        }

        if self.max_bytes == 0 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must be greater than 0".into() });
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must not exceed 50MB".into() });
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if !(1..=3).contains(&self.display_scale) {
            return Err(ConfigError::Invalid { field: "display_scale".into(), reason: "must be 1, 2 or 3".into() });
        }

        if self.max_concurrent_downloads == 0 || self.max_concurrent_downloads > 64 {
            return Err(ConfigError::Invalid {
                field: "max_concurrent_downloads".into(),
                reason: "must be between 1 and 64".into(),
            });
        }

        if self.memory_cache_max_cost == 0 {
            return Err(ConfigError::Invalid {
                field: "memory_cache_max_cost".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.max_redirects == 0 {
            tracing::warn!("max_redirects is 0; redirected resources will fail to cache");
        }

        Ok(())
    }
}
