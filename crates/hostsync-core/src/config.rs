//! Configuration types for the hosts sync agent
//!
//! [`AgentConfig`] is the single context object handed to the engine at
//! startup. [`ConfigStore`] persists it as JSON inside the agent's config
//! directory.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::error::{Error, Result};

/// Name of the config file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Name of the backup directory inside the config directory
pub const BACKUP_DIR_NAME: &str = "backups";

/// Lower bound for the sync cadence
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Main agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the route API (routes are read from `<api_url>/api/routes`)
    pub api_url: String,

    /// Seconds between two timer-driven cycles
    pub sync_interval_secs: u64,

    /// Number of backups kept after each successful write
    pub max_backups: usize,

    /// Target hosts file (platform default when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosts_path: Option<PathBuf>,

    /// Snapshot directory (`<config dir>/backups` when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,

    /// Label used inside the managed section markers
    pub product_name: String,

    /// Address every desired hostname resolves to
    pub loopback_ip: IpAddr,

    /// Timeout for one route fetch (in seconds)
    pub fetch_timeout_secs: u64,

    /// Timeout for one backup + write step (in seconds)
    pub file_io_timeout_secs: u64,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    pub event_channel_capacity: usize,
}

impl AgentConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            api_url: "http://localhost:8090".to_string(),
            sync_interval_secs: 5,
            max_backups: 20,
            hosts_path: None,
            backup_dir: None,
            product_name: "DevProxy".to_string(),
            loopback_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            fetch_timeout_secs: 5,
            file_io_timeout_secs: 10,
            event_channel_capacity: 100,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            return Err(Error::config("API URL cannot be empty"));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(Error::config(format!(
                "API URL must use the http or https scheme, got: {}",
                self.api_url
            )));
        }

        if self.product_name.trim().is_empty() {
            return Err(Error::config("product name cannot be empty"));
        }
        if self.product_name.contains(['\n', '\r']) {
            return Err(Error::config("product name cannot contain line breaks"));
        }

        if self.fetch_timeout_secs == 0 {
            return Err(Error::config("fetch timeout must be > 0"));
        }
        if self.file_io_timeout_secs == 0 {
            return Err(Error::config("file I/O timeout must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::config("event channel capacity must be > 0"));
        }

        Ok(())
    }

    /// Sync cadence, clamped to [`MIN_SYNC_INTERVAL`]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs).max(MIN_SYNC_INTERVAL)
    }

    /// Timeout applied to every route fetch
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Timeout applied to every backup + write step
    pub fn file_io_timeout(&self) -> Duration {
        Duration::from_secs(self.file_io_timeout_secs)
    }

    /// Resolved target hosts file
    pub fn hosts_path(&self) -> PathBuf {
        self.hosts_path.clone().unwrap_or_else(default_hosts_path)
    }

    /// Resolved backup directory
    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| default_config_dir().join(BACKUP_DIR_NAME))
    }

    /// Routes endpoint derived from `api_url`
    pub fn routes_url(&self) -> String {
        format!("{}/api/routes", self.api_url.trim_end_matches('/'))
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Platform-specific hosts file path
pub fn default_hosts_path() -> PathBuf {
    if cfg!(windows) {
        let root = std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".to_string());
        PathBuf::from(root)
            .join("System32")
            .join("drivers")
            .join("etc")
            .join("hosts")
    } else {
        PathBuf::from("/etc/hosts")
    }
}

/// Platform-specific config directory (`<config dir>/devproxy`)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("devproxy"))
        .unwrap_or_else(|| PathBuf::from(".devproxy"))
}

/// JSON-backed config persistence
///
/// Replaces a process-wide config singleton: the store is created once at
/// startup and its [`AgentConfig`] is passed explicitly to the engine.
#[derive(Debug)]
pub struct ConfigStore {
    dir: PathBuf,
    config: AgentConfig,
}

impl ConfigStore {
    /// Load the config from `dir`, writing defaults if none exists yet
    ///
    /// The directory is created if needed. A config without an explicit
    /// `backup_dir` gets `<dir>/backups`.
    pub async fn init<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        fs::create_dir_all(&dir).await.map_err(|e| {
            Error::config(format!(
                "Failed to create config directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let path = dir.join(CONFIG_FILE_NAME);
        let mut store = if fs::try_exists(&path).await.unwrap_or(false) {
            let content = fs::read_to_string(&path).await.map_err(|e| {
                Error::config(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let config: AgentConfig = serde_json::from_str(&content)?;
            tracing::debug!("Loaded config from {}", path.display());
            Self { dir, config }
        } else {
            let store = Self {
                dir,
                config: AgentConfig::default(),
            };
            store.save().await?;
            tracing::info!("Wrote default config to {}", path.display());
            store
        };

        if store.config.backup_dir.is_none() {
            store.config.backup_dir = Some(store.dir.join(BACKUP_DIR_NAME));
        }

        Ok(store)
    }

    /// Directory holding the config file
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the config file
    pub fn path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE_NAME)
    }

    /// Current configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Replace the configuration and persist it
    pub async fn update(&mut self, config: AgentConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        self.save().await
    }

    /// Write the configuration to disk as pretty JSON
    pub async fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.config)?;
        let path = self.path();
        fs::write(&path, json)
            .await
            .map_err(|e| Error::config(format!("Failed to write {}: {}", path.display(), e)))
    }
}
