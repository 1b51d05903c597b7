//! tenantsnap.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Rows requested per store scan call.
    pub scan_page_size: usize,
    /// Maximum rows packed into one segment.
    pub segment_max_rows: usize,
    /// Physical-table scans allowed to run at once.
    pub max_concurrent_scans: usize,
    /// Destination writes in flight during one restore.
    pub restore_write_concurrency: usize,
    /// Page size used by `list_backups` when the request sets none.
    pub default_list_page_size: usize,
    pub write_retry: RetryConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            scan_page_size: 100,
            segment_max_rows: 256,
            max_concurrent_scans: 4,
            restore_write_concurrency: 8,
            default_list_page_size: 50,
            write_retry: RetryConfig::default(),
        }
    }
}

/// Backoff applied to destination writes that fail with a retryable error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per row, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 2000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl BackupConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: BackupConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("scan_page_size", self.scan_page_size),
            ("segment_max_rows", self.segment_max_rows),
            ("max_concurrent_scans", self.max_concurrent_scans),
            ("restore_write_concurrency", self.restore_write_concurrency),
            ("default_list_page_size", self.default_list_page_size),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        if self.write_retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "write_retry.max_attempts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
