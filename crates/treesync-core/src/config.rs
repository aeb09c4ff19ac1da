//! Configuration for treesync sessions.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use treesync_engine::{MappingOptions, WatcherOptions};

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Watcher debounce window in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Interval between flushes in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Pending diff size that triggers an early flush
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    /// Maximum directories listed concurrently during scans
    #[serde(default = "default_max_scan_concurrency")]
    pub max_scan_concurrency: usize,

    /// Extra ignored path prefixes, absolute or relative to the root
    #[serde(default)]
    pub ignored: Vec<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_flush_interval_ms() -> u64 {
    100
}

fn default_max_pending() -> usize {
    4096
}

fn default_max_scan_concurrency() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            flush_interval_ms: default_flush_interval_ms(),
            max_pending: default_max_pending(),
            max_scan_concurrency: default_max_scan_concurrency(),
            ignored: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl SyncConfig {
    /// Directory holding the user configuration
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".treesync")
    }

    /// Load configuration from the user config file, falling back to defaults
    pub fn load() -> Self {
        let config_path = Self::config_dir().join("config.yaml");

        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = ?config_path, error = %e, "Failed to load config file");
                }
            }
        }

        Self::default()
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.flush_interval_ms == 0 {
            return Err(CoreError::Config("flush_interval_ms must be positive".into()));
        }
        if self.max_pending == 0 {
            return Err(CoreError::Config("max_pending must be positive".into()));
        }
        if self.max_scan_concurrency == 0 {
            return Err(CoreError::Config(
                "max_scan_concurrency must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Flush loop period
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Options for the tree mapping
    pub fn mapping_options(&self) -> MappingOptions {
        MappingOptions {
            ignored: self.ignored.clone(),
            max_scan_concurrency: self.max_scan_concurrency,
            max_pending: self.max_pending,
        }
    }

    /// Options for the native watcher
    pub fn watcher_options(&self) -> WatcherOptions {
        WatcherOptions {
            debounce_duration: Duration::from_millis(self.debounce_ms),
            ..Default::default()
        }
    }
}
