//! Bootstrap configuration loading
//!
//! Configuration file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. `CATALOG_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/listen-catalog/config.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing file is not an error: the compiled defaults are used and a
//! warning is logged.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CATALOG_CONFIG";

/// Application directory name under the platform config/data dirs
const APP_DIR: &str = "listen-catalog";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to the SQLite catalog database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Maximum pooled database connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// MusicBrainz authority client
    #[serde(default)]
    pub musicbrainz: MusicBrainzConfig,

    /// Secondary image providers
    #[serde(default)]
    pub images: ImagesConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            max_connections: default_max_connections(),
            logging: LoggingConfig::default(),
            musicbrainz: MusicBrainzConfig::default(),
            images: ImagesConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// MusicBrainz client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicBrainzConfig {
    /// When false, every authority lookup reports the service as unreachable
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_musicbrainz_url")]
    pub base_url: String,

    /// User-Agent (required by MusicBrainz policy)
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Token bucket refill rate
    #[serde(default = "default_rate")]
    pub rate_per_second: u32,

    /// Token bucket capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Pending request capacity of the dispatcher queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MusicBrainzConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_musicbrainz_url(),
            user_agent: default_user_agent(),
            rate_per_second: default_rate(),
            burst: default_burst(),
            queue_capacity: default_queue_capacity(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Image provider settings (Cover Art Archive, Deezer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub cover_art_archive: bool,

    #[serde(default = "default_true")]
    pub deezer: bool,

    #[serde(default = "default_image_rate")]
    pub rate_per_second: u32,

    #[serde(default = "default_image_burst")]
    pub burst: u32,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cover_art_archive: true,
            deezer: true,
            rate_per_second: default_image_rate(),
            burst: default_image_burst(),
            queue_capacity: default_queue_capacity(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_connections() -> u32 {
    8
}

fn default_musicbrainz_url() -> String {
    "https://musicbrainz.org/ws/2".to_string()
}

fn default_rate() -> u32 {
    1
}

fn default_burst() -> u32 {
    1
}

fn default_image_rate() -> u32 {
    5
}

fn default_image_burst() -> u32 {
    5
}

fn default_queue_capacity() -> usize {
    100
}

fn default_timeout_secs() -> u64 {
    15
}

/// Standard User-Agent for outbound HTTP clients
pub fn default_user_agent() -> String {
    format!(
        "listen-catalog/{} ( https://github.com/listen-catalog/listen-catalog )",
        env!("CARGO_PKG_VERSION")
    )
}

/// OS-dependent default database location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR).join("catalog.db"))
        .unwrap_or_else(|| PathBuf::from("./catalog_data/catalog.db"))
}

/// Resolve which config file to read, if any
///
/// Returns `None` when no candidate exists; callers fall back to defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|d| d.join(APP_DIR).join("config.toml"))
        .filter(|p| p.exists())
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;

    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    validate(&config)?;
    Ok(config)
}

/// Load bootstrap configuration with graceful degradation
///
/// An explicitly requested file (CLI or environment) that cannot be read is
/// an error. An absent default file yields compiled defaults.
pub fn load(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) => {
            let config = load_toml_config(&path)?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => {
            warn!("No configuration file found, using compiled defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Write configuration atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

fn validate(config: &TomlConfig) -> Result<()> {
    if config.musicbrainz.rate_per_second == 0 || config.images.rate_per_second == 0 {
        return Err(Error::Config(
            "rate_per_second must be at least 1".to_string(),
        ));
    }
    if config.musicbrainz.queue_capacity == 0 || config.images.queue_capacity == 0 {
        return Err(Error::Config("queue_capacity must be at least 1".to_string()));
    }
    if config.musicbrainz.user_agent.trim().is_empty() {
        return Err(Error::Config("musicbrainz.user_agent must not be empty".to_string()));
    }
    Ok(())
}
