//! Configuration resolution for Telebuf storage.
//!
//! Implements deterministic config resolution order:
//! 1. Explicit path (CLI `--config` or host API)
//! 2. Environment variable (TB_STORAGE_CONFIG)
//! 3. XDG config (`$XDG_CONFIG_HOME/telebuf/storage.json`, then `~/.config/telebuf/`)
//! 4. Built-in defaults

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::{ConfigResolution, ConfigSource, StorageConfig};
use crate::error::{Error, Result};

/// Environment variable naming an explicit storage config file.
pub const CONFIG_ENV_VAR: &str = "TB_STORAGE_CONFIG";

const CONFIG_FILE_NAME: &str = "storage.json";

/// Configuration resolver with deterministic resolution order.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    explicit_path: Option<PathBuf>,
}

impl ConfigResolver {
    /// Create a resolver honoring an explicit config path.
    pub fn new(explicit_path: Option<PathBuf>) -> Self {
        ConfigResolver { explicit_path }
    }

    /// Create a resolver with no explicit override.
    pub fn with_defaults() -> Self {
        ConfigResolver::default()
    }

    /// Resolve the config directory path.
    pub fn resolve_config_dir(&self) -> Option<PathBuf> {
        if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
            return Some(PathBuf::from(xdg).join("telebuf"));
        }

        dirs::config_dir().map(|d| d.join("telebuf"))
    }

    /// Resolve the storage.json path.
    pub fn resolve_config_path(&self) -> (Option<PathBuf>, ConfigResolution) {
        // 1. Explicit path
        if let Some(ref path) = self.explicit_path {
            return (Some(path.clone()), ConfigResolution::Explicit);
        }

        // 2. TB_STORAGE_CONFIG env var
        if let Ok(path) = env::var(CONFIG_ENV_VAR) {
            return (Some(PathBuf::from(path)), ConfigResolution::EnvVar);
        }

        // 3. XDG config dir
        if let Some(config_dir) = self.resolve_config_dir() {
            let path = config_dir.join(CONFIG_FILE_NAME);
            if path.exists() {
                return (Some(path), ConfigResolution::XdgConfig);
            }
        }

        // 4. Default
        (None, ConfigResolution::Default)
    }

    /// Load the storage config from the resolved path or defaults.
    pub fn load(&self) -> Result<(StorageConfig, ConfigSource)> {
        let (path, resolution) = self.resolve_config_path();

        match path {
            Some(p) => {
                let config = load_config_file(&p)?;
                Ok((
                    config,
                    ConfigSource {
                        path: Some(p),
                        resolution,
                    },
                ))
            }
            None => Ok((
                StorageConfig::default(),
                ConfigSource {
                    path: None,
                    resolution: ConfigResolution::Default,
                },
            )),
        }
    }
}

/// Read, parse and validate one storage config file.
pub fn load_config_file(path: &Path) -> Result<StorageConfig> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "failed to read storage config from {}: {}",
            path.display(),
            e
        ))
    })?;

    let config: StorageConfig = serde_json::from_str(&content).map_err(|e| {
        Error::InvalidConfig(format!("failed to parse {}: {}", path.display(), e))
    })?;

    config.validate()?;
    Ok(config)
}
