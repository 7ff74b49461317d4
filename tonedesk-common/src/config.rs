//! Configuration loading
//!
//! Priority order, highest first:
//! 1. Environment variables (a `.env` file is loaded into the environment)
//! 2. TOML config file (`TONEDESK_CONFIG`, else `<config_dir>/tonedesk/config.toml`)
//! 3. Compiled defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{Error, Result};

pub const ENV_CONFIG_FILE: &str = "TONEDESK_CONFIG";
pub const ENV_BOT_TOKEN: &str = "BOT_TOKEN";
pub const ENV_DATABASE_URL: &str = "TONEDESK_DATABASE_URL";
pub const ENV_DOWNLOAD_DIR: &str = "TONEDESK_DOWNLOAD_DIR";
pub const ENV_MAX_FILE_SIZE: &str = "TONEDESK_MAX_FILE_SIZE";
pub const ENV_PROCESSING_TIMEOUT: &str = "TONEDESK_PROCESSING_TIMEOUT_SECS";
pub const ENV_SWEEP_INTERVAL: &str = "TONEDESK_SWEEP_INTERVAL_SECS";
pub const ENV_FFMPEG: &str = "TONEDESK_FFMPEG";
pub const ENV_FFPROBE: &str = "TONEDESK_FFPROBE";
pub const ENV_TELEGRAM_API: &str = "TONEDESK_TELEGRAM_API";
pub const ENV_LOG_FILTER: &str = "RUST_LOG";

/// Compiled defaults
pub const DEFAULT_DOWNLOAD_DIR: &str = "./downloads";
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2000 * 1024 * 1024;
pub const DEFAULT_PROCESSING_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";
pub const DEFAULT_LOG_FILTER: &str = "tonedesk_bot=info,tonedesk_common=info";

/// Optional TOML configuration file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    pub bot_token: Option<String>,
    pub database_url: Option<String>,
    pub download_dir: Option<PathBuf>,
    pub max_file_size_bytes: Option<u64>,
    pub processing_timeout_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,
    pub telegram_api_url: Option<String>,
    pub log_filter: Option<String>,
}

/// Resolved process configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bot_token: String,
    /// `None` selects the in-process session backend
    pub database_url: Option<String>,
    pub download_dir: PathBuf,
    pub max_file_size_bytes: u64,
    pub processing_timeout: Duration,
    pub sweep_interval: Duration,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub telegram_api_url: String,
    pub log_filter: String,
}

impl AppConfig {
    /// Load from `.env`, the TOML file (if any) and the process environment
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }

        let toml_config = match config_file_path() {
            Some(path) => {
                info!("Reading config file {}", path.display());
                load_toml_config(&path)?
            }
            None => TomlConfig::default(),
        };

        Self::from_sources(toml_config, |key| std::env::var(key).ok())
    }

    /// Merge a TOML config with an environment lookup (environment wins)
    pub fn from_sources<F>(toml_config: TomlConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env(key).filter(|value| !value.trim().is_empty());

        let bot_token = lookup(ENV_BOT_TOKEN)
            .or(toml_config.bot_token)
            .unwrap_or_default();

        let database_url = lookup(ENV_DATABASE_URL)
            .or(toml_config.database_url)
            .filter(|url| !url.trim().is_empty());

        let download_dir = lookup(ENV_DOWNLOAD_DIR)
            .map(PathBuf::from)
            .or(toml_config.download_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR));

        let max_file_size_bytes = parse_number(ENV_MAX_FILE_SIZE, lookup(ENV_MAX_FILE_SIZE))?
            .or(toml_config.max_file_size_bytes)
            .unwrap_or(DEFAULT_MAX_FILE_SIZE);

        let processing_timeout_secs =
            parse_number(ENV_PROCESSING_TIMEOUT, lookup(ENV_PROCESSING_TIMEOUT))?
                .or(toml_config.processing_timeout_secs)
                .unwrap_or(DEFAULT_PROCESSING_TIMEOUT_SECS);

        let sweep_interval_secs = parse_number(ENV_SWEEP_INTERVAL, lookup(ENV_SWEEP_INTERVAL))?
            .or(toml_config.sweep_interval_secs)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);

        Ok(Self {
            bot_token,
            database_url,
            download_dir,
            max_file_size_bytes,
            processing_timeout: Duration::from_secs(processing_timeout_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            ffmpeg_path: lookup(ENV_FFMPEG)
                .or(toml_config.ffmpeg_path)
                .unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe_path: lookup(ENV_FFPROBE)
                .or(toml_config.ffprobe_path)
                .unwrap_or_else(|| "ffprobe".to_string()),
            telegram_api_url: lookup(ENV_TELEGRAM_API)
                .or(toml_config.telegram_api_url)
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API.to_string()),
            log_filter: lookup(ENV_LOG_FILTER)
                .or(toml_config.log_filter)
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        })
    }

    /// Check required values and create the download directory
    pub fn validate(&self) -> Result<()> {
        if self.bot_token.trim().is_empty() {
            return Err(Error::Config(format!(
                "{} is required (environment or config file)",
                ENV_BOT_TOKEN
            )));
        }
        if self.processing_timeout.is_zero() {
            return Err(Error::Config("processing timeout must be positive".to_string()));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::Config("sweep interval must be positive".to_string()));
        }
        if self.max_file_size_bytes == 0 {
            return Err(Error::Config("max file size must be positive".to_string()));
        }

        std::fs::create_dir_all(&self.download_dir).map_err(|e| {
            Error::Config(format!(
                "Cannot create download directory {}: {}",
                self.download_dir.display(),
                e
            ))
        })?;

        if self.database_url.is_none() {
            warn!("{} not set, sessions are kept in memory only", ENV_DATABASE_URL);
        }

        Ok(())
    }
}

fn parse_number(key: &str, value: Option<String>) -> Result<Option<u64>> {
    value
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|e| Error::Config(format!("{} must be a whole number: {}", key, e)))
        })
        .transpose()
}

/// Locate the TOML config file, if one exists
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(ENV_CONFIG_FILE) {
        if !explicit.trim().is_empty() {
            return Some(PathBuf::from(explicit));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("tonedesk").join("config.toml"))?;
    if user_config.exists() {
        Some(user_config)
    } else {
        None
    }
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid TOML in {}: {}", path.display(), e)))
}
