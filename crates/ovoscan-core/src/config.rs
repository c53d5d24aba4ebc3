//! Configuration management for ovoscan
//!
//! Handles loading, saving, and validating the service configuration:
//! HTTP surface limits, upload checks, worker pool, session retention
//! and the external detector command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use image::ImageFormat;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Upload validation settings
    #[serde(default)]
    pub upload: UploadConfig,
    /// Job runner settings
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Session store settings
    #[serde(default)]
    pub store: StoreConfig,
    /// External detector settings
    #[serde(default)]
    pub detector: DetectorConfig,
    /// General application settings
    #[serde(default)]
    pub general: GeneralConfig,
}

impl Config {
    /// Check the values that would make the service unusable
    pub fn validate(&self) -> Result<()> {
        if self.runner.workers == 0 {
            return Err(Error::Config("runner.workers must be at least 1".to_string()));
        }
        if self.upload.max_files == 0 {
            return Err(Error::Config("upload.max_files must be at least 1".to_string()));
        }
        if self.upload.max_file_bytes == 0 {
            return Err(Error::Config(
                "upload.max_file_bytes must be at least 1".to_string(),
            ));
        }
        if self.store.max_sessions == 0 {
            return Err(Error::Config("store.max_sessions must be at least 1".to_string()));
        }
        if self.store.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "store.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        self.upload.formats()?;
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub bind: String,
    /// Upper bound for a whole upload request body
    pub max_request_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            max_request_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Upload validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum number of files in one batch
    pub max_files: usize,
    /// Maximum size of a single file
    pub max_file_bytes: usize,
    /// Accepted image formats, by extension name ("png", "jpeg", ...)
    pub allowed_formats: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_files: 64,
            max_file_bytes: 10 * 1024 * 1024,
            allowed_formats: ["png", "jpeg", "bmp", "tiff", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl UploadConfig {
    /// Resolve the configured format names
    pub fn formats(&self) -> Result<Vec<ImageFormat>> {
        self.allowed_formats
            .iter()
            .map(|name| {
                ImageFormat::from_extension(name.to_ascii_lowercase())
                    .ok_or_else(|| Error::Config(format!("Unknown image format: {}", name)))
            })
            .collect()
    }
}

/// Job runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Number of jobs allowed to run against the detector at once
    pub workers: usize,
    /// Upper bound for one job, measured from submission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_timeout_secs: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            job_timeout_secs: None,
        }
    }
}

impl RunnerConfig {
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a finished session stays readable
    pub retention_secs: u64,
    /// How often the background sweep runs
    pub sweep_interval_secs: u64,
    /// Maximum number of sessions held at once
    pub max_sessions: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention_secs: 3600,
            sweep_interval_secs: 60,
            max_sessions: 1024,
        }
    }
}

impl StoreConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// External detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Program and arguments; the image is written to its stdin
    pub command: Vec<String>,
    /// Per-image timeout (seconds)
    pub timeout_secs: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 120,
        }
    }
}

/// General application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Configuration manager for loading and saving config
pub struct ConfigManager {
    config_path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::with_path(config_path)
    }

    /// Create a config manager with a specific path
    ///
    /// A missing file yields the default configuration.
    pub fn with_path(config_path: PathBuf) -> Result<Self> {
        let config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Config::default()
        };

        Ok(Self { config_path, config })
    }

    /// Get the default config path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not find config directory".to_string()))?;

        Ok(config_dir.join("ovoscan").join("config.toml"))
    }

    fn load_from_path(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Path this manager loads from and saves to
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get mutable access to configuration
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the manager, keeping only the configuration
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(&self.config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&self.config_path, content)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }
}
