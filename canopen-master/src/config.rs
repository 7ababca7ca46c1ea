use crate::transport::BitRate;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_SDO_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the configuration directory")]
    NoConfigDir,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("could not serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub can_interface: String,
    pub bit_rate: BitRate,
    pub sdo_timeout_ms: u64,
    pub enable_trace: bool,
    pub trace_directory: Option<String>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            can_interface: "can0".to_string(),
            bit_rate: BitRate::default(),
            sdo_timeout_ms: DEFAULT_SDO_TIMEOUT_MS,
            enable_trace: false,
            trace_directory: None,
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "canopen", "canopen-master")
}

impl MasterConfig {
    /// Get the path to the config file
    pub fn config_file_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from file, returns default if file doesn't exist or on error
    pub fn load() -> Self {
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                match Self::load_from(&config_path) {
                    Ok(config) => {
                        info!("loaded configuration from {:?}", config_path);
                        return config;
                    }
                    Err(e) => warn!("ignoring {:?}: {}", config_path, e),
                }
            }
        }

        info!("using default configuration");
        Self::default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save configuration to the per-user config file
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_file_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, toml::to_string_pretty(self)?)?;
        info!("saved configuration to {:?}", path);
        Ok(())
    }

    pub fn sdo_timeout(&self) -> Duration {
        Duration::from_millis(self.sdo_timeout_ms)
    }

    /// Get the default trace directory path
    pub fn default_trace_directory() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.data_local_dir().join("traces"))
    }

    pub fn trace_directory_or_default(&self) -> Option<PathBuf> {
        match self.trace_directory {
            Some(ref dir) => Some(PathBuf::from(dir)),
            None => Self::default_trace_directory(),
        }
    }
}
