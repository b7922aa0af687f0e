//! Bootstrap configuration loading and root folder resolution
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments
//! 2. Environment variables (`R4_ROOT_FOLDER`, `R4_REMOTE_API_KEY`)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const ROOT_FOLDER_ENV: &str = "R4_ROOT_FOLDER";
pub const API_KEY_ENV: &str = "R4_REMOTE_API_KEY";

const DATABASE_FILE_NAME: &str = "r4.db";

/// Bootstrap configuration loaded from TOML file
///
/// Read once at startup; the engine must restart to pick up changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder for the local store (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Explicit database file; defaults to `<root_folder>/r4.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub legacy: LegacyConfig,

    #[serde(default)]
    pub sync: SyncSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
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

/// HTTP control surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Remote authoritative store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_url(),
            api_key: None,
        }
    }
}

/// Frozen legacy archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyConfig {
    /// Bulk channel snapshot: `http(s)://` URL or local file path
    #[serde(default = "default_legacy_snapshot")]
    pub snapshot: String,

    /// Base URL of the per-channel track lookup
    #[serde(default = "default_legacy_tracks_url")]
    pub tracks_base_url: String,
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            snapshot: default_legacy_snapshot(),
            tracks_base_url: default_legacy_tracks_url(),
        }
    }
}

/// Sync tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Simultaneous channel pulls during batch track sync
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Rows per track write transaction
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Remote/local timestamp gap still considered up to date
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: i64,

    /// Max live channels fetched per metadata pull
    #[serde(default = "default_channel_limit")]
    pub channel_limit: usize,

    /// Max legacy channels read from the snapshot
    #[serde(default = "default_legacy_limit")]
    pub legacy_limit: usize,

    /// Legacy channels with fewer tracks are not imported
    #[serde(default = "default_legacy_min_tracks")]
    pub legacy_min_tracks: u32,

    /// Max total wait when retrying a locked database write
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            chunk_size: default_chunk_size(),
            tolerance_secs: default_tolerance_secs(),
            channel_limit: default_channel_limit(),
            legacy_limit: default_legacy_limit(),
            legacy_min_tracks: default_legacy_min_tracks(),
            lock_wait_ms: default_lock_wait_ms(),
        }
    }
}

impl SyncSettings {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("sync.concurrency must be at least 1".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("sync.chunk_size must be at least 1".to_string()));
        }
        if self.tolerance_secs < 0 {
            return Err(Error::Config("sync.tolerance_secs must not be negative".to_string()));
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    5780
}

fn default_remote_url() -> String {
    "https://api.radio4000.com".to_string()
}

fn default_legacy_snapshot() -> String {
    "https://radio4000.com/r5-channels.json".to_string()
}

fn default_legacy_tracks_url() -> String {
    "https://radio4000.firebaseio.com".to_string()
}

fn default_concurrency() -> usize {
    8
}

fn default_chunk_size() -> usize {
    50
}

fn default_tolerance_secs() -> i64 {
    20
}

fn default_channel_limit() -> usize {
    2000
}

fn default_legacy_limit() -> usize {
    2000
}

fn default_legacy_min_tracks() -> u32 {
    10
}

fn default_lock_wait_ms() -> u64 {
    5000
}

/// Platform config file location (`~/.config/r4/r4-sync.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("r4").join("r4-sync.toml"))
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    config.sync.validate()?;
    Ok(config)
}

/// Load configuration from an explicit path, the platform default, or defaults
///
/// An explicit path must exist; a missing platform default file is not an error.
pub fn load_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit {
        info!("Loading config: {}", path.display());
        return load_toml_config(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => {
            info!("Loading config: {}", path.display());
            load_toml_config(&path)
        }
        _ => {
            debug!("No config file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Serialize a config back to TOML
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. `R4_ROOT_FOLDER` environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Database file for a resolved root folder
pub fn database_path(root_folder: &Path, toml: &TomlConfig) -> PathBuf {
    toml.database_path
        .clone()
        .unwrap_or_else(|| root_folder.join(DATABASE_FILE_NAME))
}

/// Remote API key: environment first, then TOML
pub fn resolve_api_key(toml: &TomlConfig) -> Option<String> {
    std::env::var(API_KEY_ENV)
        .ok()
        .or_else(|| toml.remote.api_key.clone())
        .filter(|key| !key.trim().is_empty())
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("r4"))
        .unwrap_or_else(|| PathBuf::from("./r4_data"))
}
