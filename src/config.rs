//! Configuration module for tierbox.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::file::{LapsedUploadPolicy, MAX_FILE_SIZE};
use crate::ledger::{DEFAULT_FREE_LIMIT, DEFAULT_PREMIUM_LIMIT};
use crate::package::{DEFAULT_PREMIUM_DURATION_SECS, DEFAULT_SWEEP_INTERVAL_SECS};
use crate::{Result, TierboxError};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file (connection URL with `postgres`).
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/tierbox.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Blob storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the filesystem blob store.
    #[serde(default = "default_storage_path")]
    pub path: String,
    /// Maximum size of a single upload in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: i64,
    /// Timeout for each blob/metadata store call in seconds (0 = none).
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_storage_path() -> String {
    "data/blobs".to_string()
}

fn default_max_file_size() -> i64 {
    MAX_FILE_SIZE
}

fn default_call_timeout() -> u64 {
    30
}

impl StorageConfig {
    /// Per-call timeout, `None` when disabled.
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            max_file_size_bytes: default_max_file_size(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

/// Per-tier storage limits given to new accounts.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_free_limit")]
    pub free_limit_bytes: i64,
    #[serde(default = "default_premium_limit")]
    pub premium_limit_bytes: i64,
}

fn default_free_limit() -> i64 {
    DEFAULT_FREE_LIMIT
}

fn default_premium_limit() -> i64 {
    DEFAULT_PREMIUM_LIMIT
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_limit_bytes: default_free_limit(),
            premium_limit_bytes: default_premium_limit(),
        }
    }
}

/// Premium package configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageConfig {
    /// Length of a premium period in seconds (0 = permanent).
    #[serde(default = "default_premium_duration")]
    pub premium_duration_secs: u64,
    /// Upload behavior for accounts whose premium period lapsed.
    #[serde(default)]
    pub lapsed_upload_policy: LapsedUploadPolicy,
}

fn default_premium_duration() -> u64 {
    DEFAULT_PREMIUM_DURATION_SECS
}

/// Longest premium period accepted by [`Config::validate`] (100 years).
pub const MAX_PREMIUM_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

impl PackageConfig {
    /// Premium period, `None` when premium is permanent.
    ///
    /// Values past [`MAX_PREMIUM_DURATION_SECS`] are clamped to it.
    pub fn premium_duration(&self) -> Option<chrono::Duration> {
        let secs = self.premium_duration_secs.min(MAX_PREMIUM_DURATION_SECS) as i64;
        (secs > 0).then(|| chrono::Duration::seconds(secs))
    }
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            premium_duration_secs: default_premium_duration(),
            lapsed_upload_policy: LapsedUploadPolicy::default(),
        }
    }
}

/// Expiration sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Run the sweep in the background.
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweep_enabled(),
            interval_secs: default_sweep_interval(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path; empty logs to stdout only.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/tierbox.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub package: PackageConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| TierboxError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `TIERBOX_DATABASE_PATH`
    /// - `TIERBOX_STORAGE_PATH`
    /// - `TIERBOX_LOG_LEVEL`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(path) = get("TIERBOX_DATABASE_PATH") {
            self.database.path = path;
        }
        if let Some(path) = get("TIERBOX_STORAGE_PATH") {
            self.storage.path = path;
        }
        if let Some(level) = get("TIERBOX_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.quota.free_limit_bytes <= 0 || self.quota.premium_limit_bytes <= 0 {
            return Err(TierboxError::Config(
                "quota limits must be positive".to_string(),
            ));
        }
        if self.storage.max_file_size_bytes <= 0 {
            return Err(TierboxError::Config(
                "storage.max_file_size_bytes must be positive".to_string(),
            ));
        }
        if self.package.premium_duration_secs > MAX_PREMIUM_DURATION_SECS {
            return Err(TierboxError::Config(format!(
                "package.premium_duration_secs must be at most {MAX_PREMIUM_DURATION_SECS}"
            )));
        }
        if self.sweep.enabled && self.sweep.interval_secs == 0 {
            return Err(TierboxError::Config(
                "sweep.interval_secs must be positive when the sweep is enabled".to_string(),
            ));
        }
        Ok(())
    }
}
