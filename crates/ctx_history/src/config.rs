//! Configuration types for history, diffing and archive storage.

use crate::error::{HistoryError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Name of the configuration file inside a history directory.
pub const CONFIG_FILE: &str = "history.toml";

/// Comprehensive configuration for a context history.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Timeline configuration.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Diff computation configuration.
    #[serde(default)]
    pub diff: DiffConfig,

    /// Worker pool configuration.
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Archive storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from `history.toml` in `dir`, or defaults if absent.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| HistoryError::ConfigError(format!("failed to read config: {}", e)))?;
            toml::from_str(&content)
                .map_err(|e| HistoryError::ConfigError(format!("failed to parse config: {}", e)))
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to `history.toml` in `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self)
            .map_err(|e| HistoryError::ConfigError(format!("failed to serialize config: {}", e)))?;
        fs::write(&path, content)
            .map_err(|e| HistoryError::ConfigError(format!("failed to write config: {}", e)))?;
        Ok(())
    }
}

/// Timeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum number of contexts kept on the timeline (default: 100).
    /// Older contexts are dropped from the front.
    pub max_depth: usize,

    /// How long a push waits for the new context's snapshots to resolve,
    /// in milliseconds (default: 5000).
    pub snapshot_await_timeout_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_depth: 100,
            snapshot_await_timeout_ms: 5000,
        }
    }
}

impl HistoryConfig {
    pub fn snapshot_await_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_await_timeout_ms)
    }
}

/// Diff computation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Bounded wait for a fragment's text before the fallback message is
    /// used, in milliseconds (default: 2000).
    pub text_fallback_timeout_ms: u64,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            text_fallback_timeout_ms: 2000,
        }
    }
}

impl DiffConfig {
    pub fn text_fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.text_fallback_timeout_ms)
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of worker threads (default: 4, minimum 1).
    pub threads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { threads: 4 }
    }
}

/// Archive storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Compression level for zstd (1-22, default: 3).
    /// Higher values mean better compression but slower saves.
    pub compression_level: i32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compression_level: 3,
        }
    }
}
