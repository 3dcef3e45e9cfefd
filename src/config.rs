use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fitsync_core::SyncSettings;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

fn default_interval_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_max_queue_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Server URL (e.g., "http://localhost:8080")
    pub server_url: Option<String>,
    /// API key for authentication
    pub api_key: Option<String>,
    /// Seconds between background sync attempts
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Offline queue capacity; the oldest change is discarded beyond it
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Failed attempts before a change is given up on
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            interval_secs: default_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            max_queue_size: default_max_queue_size(),
            max_retries: default_max_retries(),
        }
    }
}

impl SyncConfig {
    /// Returns true if sync is configured (has both server_url and api_key)
    pub fn is_configured(&self) -> bool {
        self.server_url.is_some() && self.api_key.is_some()
    }

    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            interval: Duration::from_secs(self.interval_secs.max(1)),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs.max(1)),
            max_queue_size: self.max_queue_size.max(1),
            max_retries: self.max_retries.max(1),
        }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite mirror database
    pub database_path: ConfigValue<PathBuf>,
    /// Path to the offline operation queue
    pub queue_path: ConfigValue<PathBuf>,
    /// Member id recorded on typed logs when none is given
    pub created_by: ConfigValue<String>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// Sync configuration
    pub sync: SyncConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    queue_path: Option<PathBuf>,
    created_by: Option<String>,
    sync: Option<SyncConfig>,
}

/// Resolves relative paths against the config file's directory
fn resolve(config_path: &Path, path: PathBuf) -> PathBuf {
    if path.is_relative() {
        config_path
            .parent()
            .map(|p| p.join(&path))
            .unwrap_or(path)
    } else {
        path
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let data_dir = Self::default_data_dir();

        let mut database_path =
            ConfigValue::new(data_dir.join("fitsync.db"), ConfigSource::Default);
        let mut queue_path =
            ConfigValue::new(data_dir.join("sync_queue.json"), ConfigSource::Default);
        let mut created_by = ConfigValue::new("default".to_string(), ConfigSource::Default);
        let mut config_file = None;
        let mut sync = SyncConfig::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                database_path = ConfigValue::new(resolve(&path, db_path), ConfigSource::File);
            }
            if let Some(q_path) = file_config.queue_path {
                queue_path = ConfigValue::new(resolve(&path, q_path), ConfigSource::File);
            }
            if let Some(user) = file_config.created_by {
                created_by = ConfigValue::new(user, ConfigSource::File);
            }
            if let Some(sync_config) = file_config.sync {
                sync = sync_config;
            }
        }

        if let Ok(db_path) = std::env::var("FITSYNC_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(q_path) = std::env::var("FITSYNC_QUEUE_PATH") {
            queue_path = ConfigValue::new(PathBuf::from(q_path), ConfigSource::Environment);
        }
        if let Ok(user) = std::env::var("FITSYNC_CREATED_BY") {
            created_by = ConfigValue::new(user, ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("FITSYNC_SYNC_URL") {
            sync.server_url = Some(url);
        }
        if let Ok(key) = std::env::var("FITSYNC_SYNC_API_KEY") {
            sync.api_key = Some(key);
        }

        Ok(Self {
            database_path,
            queue_path,
            created_by,
            config_file,
            sync,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/fitsync/
    /// - macOS: ~/Library/Application Support/fitsync/
    /// - Windows: %APPDATA%/fitsync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fitsync")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/fitsync/
    /// - macOS: ~/Library/Application Support/fitsync/
    /// - Windows: %APPDATA%/fitsync/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fitsync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadError(_, e) => Some(e),
            ConfigError::ParseError(_, e) => Some(e),
        }
    }
}
