//! Storage configuration for Telebuf.
//!
//! This module provides:
//! - Typed configuration for batch file rotation, aging and disk caps
//! - Deterministic config resolution (explicit path > env > XDG > defaults)
//! - Semantic validation

pub mod resolve;

pub use resolve::ConfigResolver;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Thresholds controlling batch file rotation and cleanup inside one directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePersistenceConfig {
    /// Age below which a batch file is still considered open for writes.
    pub recent_delay_ms: u64,
    /// Maximum size of a single batch file in bytes.
    pub max_batch_size: u64,
    /// Maximum size of a single serialized item in bytes.
    pub max_item_size: u64,
    /// Maximum number of items appended to one batch file.
    pub max_items_per_batch: u64,
    /// Batch files older than this are deleted unread.
    pub old_file_threshold_ms: u64,
    /// Disk cap for one batch directory in bytes.
    pub max_disk_space: u64,
    /// Minimum interval between two cleanups triggered by writes.
    pub cleanup_frequency_ms: u64,
}

impl Default for FilePersistenceConfig {
    fn default() -> Self {
        FilePersistenceConfig {
            recent_delay_ms: 5_000,
            max_batch_size: 4 * 1024 * 1024,  // 4 MiB
            max_item_size: 512 * 1024,        // 512 KiB
            max_items_per_batch: 500,
            old_file_threshold_ms: 18 * 60 * 60 * 1000, // 18 hours
            max_disk_space: 128 * 1024 * 1024, // 128 MiB
            cleanup_frequency_ms: 5_000,
        }
    }
}

impl FilePersistenceConfig {
    /// Validate thresholds.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::InvalidConfig("max_batch_size must be > 0".into()));
        }
        if self.max_item_size == 0 {
            return Err(Error::InvalidConfig("max_item_size must be > 0".into()));
        }
        if self.max_items_per_batch == 0 {
            return Err(Error::InvalidConfig(
                "max_items_per_batch must be > 0".into(),
            ));
        }
        if self.max_item_size > self.max_batch_size {
            return Err(Error::InvalidConfig(format!(
                "max_item_size ({}) exceeds max_batch_size ({})",
                self.max_item_size, self.max_batch_size
            )));
        }
        if self.max_disk_space < self.max_batch_size {
            return Err(Error::InvalidConfig(format!(
                "max_disk_space ({}) is smaller than max_batch_size ({})",
                self.max_disk_space, self.max_batch_size
            )));
        }
        Ok(())
    }
}

/// Bounded retry used when wiping a batch directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WipeRetryConfig {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for WipeRetryConfig {
    fn default() -> Self {
        WipeRetryConfig {
            attempts: 3,
            delay_ms: 500,
        }
    }
}

impl WipeRetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// The complete storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding every feature's batch directories.
    pub root_dir: PathBuf,
    /// Per-directory rotation thresholds.
    pub persistence: FilePersistenceConfig,
    /// Capacity of the serialized write queue.
    pub queue_capacity: usize,
    /// Retry policy for directory wipes.
    pub wipe_retry: WipeRetryConfig,
    /// Bytes written between two records of the same batch file.
    pub separator: String,
    /// Bytes prepended to a batch payload when it is read.
    pub read_prefix: String,
    /// Bytes appended to a batch payload when it is read.
    pub read_suffix: String,
    /// Layout version embedded in directory names.
    pub schema_version: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            root_dir: default_storage_dir(),
            persistence: FilePersistenceConfig::default(),
            queue_capacity: 1024,
            wipe_retry: WipeRetryConfig::default(),
            separator: "\n".to_string(),
            read_prefix: String::new(),
            read_suffix: String::new(),
            schema_version: crate::SCHEMA_VERSION,
        }
    }
}

impl StorageConfig {
    /// Validate the configuration semantically.
    pub fn validate(&self) -> Result<()> {
        self.persistence.validate()?;
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue_capacity must be > 0".into()));
        }
        if self.wipe_retry.attempts == 0 {
            return Err(Error::InvalidConfig(
                "wipe_retry.attempts must be > 0".into(),
            ));
        }
        if self.root_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("root_dir must not be empty".into()));
        }
        Ok(())
    }

    /// Set the storage root.
    pub fn with_root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.root_dir = root_dir.into();
        self
    }

    /// Set the persistence thresholds.
    pub fn with_persistence(mut self, persistence: FilePersistenceConfig) -> Self {
        self.persistence = persistence;
        self
    }
}

/// Get the storage base directory from the XDG data dir.
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("telebuf")
}

/// Configuration source for a file.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Path to the config file, or None if using defaults
    pub path: Option<PathBuf>,
    /// How this source was resolved
    pub resolution: ConfigResolution,
}

/// How a config file was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigResolution {
    /// From an explicit path (CLI flag or host API)
    Explicit,
    /// From environment variable
    EnvVar,
    /// From XDG config directory
    XdgConfig,
    /// Using built-in defaults
    Default,
}

impl std::fmt::Display for ConfigResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigResolution::Explicit => write!(f, "explicit"),
            ConfigResolution::EnvVar => write!(f, "env"),
            ConfigResolution::XdgConfig => write!(f, "xdg"),
            ConfigResolution::Default => write!(f, "default"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        StorageConfig::default().validate().unwrap();
        let config = FilePersistenceConfig::default();
        assert_eq!(config.max_items_per_batch, 500);
        assert_eq!(config.recent_delay_ms, 5_000);
    }

    #[test]
    fn test_item_larger_than_batch_rejected() {
        let config = FilePersistenceConfig {
            max_item_size: 2048,
            max_batch_size: 1024,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), 11);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"queue_capacity": 8, "persistence": {"max_items_per_batch": 3}}"#;
        let config: StorageConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.persistence.max_items_per_batch, 3);
        assert_eq!(config.persistence.max_item_size, 512 * 1024);
        assert_eq!(config.wipe_retry, WipeRetryConfig::default());
        assert_eq!(config.separator, "\n");
    }

    #[test]
    fn test_zero_retry_attempts_rejected() {
        let mut config = StorageConfig::default();
        config.wipe_retry.attempts = 0;
        assert!(config.validate().is_err());
    }
}
