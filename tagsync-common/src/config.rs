//! Bootstrap configuration loading and root folder resolution
//!
//! The TOML file is optional. A missing file yields built-in defaults with a
//! warning; a present but malformed file is a configuration error.
//!
//! # Root folder priority
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`TAGSYNC_ROOT_FOLDER`)
//! 3. TOML config file `root_folder`
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "TAGSYNC_ROOT_FOLDER";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder holding the local database
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Base URL of the external metadata API
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// Pre-acquired bearer token for the metadata API
    #[serde(default)]
    pub api_token: Option<String>,

    /// Request coordinator tunables
    #[serde(default)]
    pub coordinator: CoordinatorSection,

    /// Backfill orchestrator tunables
    #[serde(default)]
    pub backfill: BackfillSection,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `[coordinator]` table; every key is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorSection {
    pub max_requests_per_second: Option<u32>,
    pub max_requests_per_minute: Option<u32>,
    pub circuit_breaker_threshold: Option<u32>,
    pub circuit_breaker_reset_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub max_rate_limit_waits: Option<u32>,
}

/// `[backfill]` table; every key is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillSection {
    pub batch_size: Option<usize>,
    pub max_record_attempts: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub batch_delay_ms: Option<u64>,
    pub batch_delay_max_ms: Option<u64>,
    pub batch_delay_multiplier: Option<f64>,
    pub max_consecutive_failures: Option<u32>,
    pub checkpoint_every_batches: Option<usize>,
}

/// Load TOML configuration
///
/// `path` overrides the platform default location. A missing file is not
/// an error: defaults are returned and a warning is logged.
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match default_config_path() {
            Some(p) => p,
            None => {
                warn!("Could not determine config directory, using defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using defaults");
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;

    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Default configuration file path for the platform
///
/// `~/.config/tagsync/config.toml` on Linux, the equivalent per-user config
/// directory elsewhere.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tagsync").join("config.toml"))
}

/// Resolve the root folder following the documented priority order
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tagsync"))
        .unwrap_or_else(|| PathBuf::from("./tagsync_data"))
}
