//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (PERMACACHE_*)
//! 2. TOML config file (if PERMACACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// File name of the relational index inside `cache_dir`.
pub const DATABASE_FILE_NAME: &str = "PersistentCache.sqlite";

/// Directory name of the content store inside `cache_dir`.
pub const CONTENT_DIR_NAME: &str = "PersistentCache";

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (PERMACACHE_*)
/// 2. TOML config file (if PERMACACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root directory holding the index database and the content directory.
    ///
    /// Set via PERMACACHE_CACHE_DIR environment variable.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via PERMACACHE_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum bytes to fetch per request.
    ///
    /// Set via PERMACACHE_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via PERMACACHE_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum redirects followed per request.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Device pixel scale (1, 2 or 3) driving image variant selection.
    ///
    /// Set via PERMACACHE_DISPLAY_SCALE environment variable.
    #[serde(default = "default_display_scale")]
    pub display_scale: u8,

    /// Concurrent downloads allowed per group.
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Total cost budget of the in-memory response cache.
    #[serde(default = "default_memory_cache_max_cost")]
    pub memory_cache_max_cost: u64,

    /// Preferred language variant per language code, e.g. `zh = "zh-hant"`.
    ///
    /// Set via PERMACACHE_LANGUAGE_VARIANTS__<LANG> environment variables.
    #[serde(default)]
    pub language_variants: BTreeMap<String, String>,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./permacache")
}

fn default_user_agent() -> String {
    "permacache/0.1".into()
}

fn default_max_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_redirects() -> usize {
    5
}

fn default_display_scale() -> u8 {
    2
}

fn default_max_concurrent_downloads() -> usize {
    6
}

fn default_memory_cache_max_cost() -> u64 {
    64 * 1024 * 1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            max_redirects: default_max_redirects(),
            display_scale: default_display_scale(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            memory_cache_max_cost: default_memory_cache_max_cost(),
            language_variants: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Path of the SQLite index.
    pub fn database_path(&self) -> PathBuf {
        self.cache_dir.join(DATABASE_FILE_NAME)
    }

    /// Directory holding content and header files.
    pub fn content_dir(&self) -> PathBuf {
        self.cache_dir.join(CONTENT_DIR_NAME)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `PERMACACHE_`
    /// 2. TOML file from `PERMACACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("PERMACACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("PERMACACHE_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
