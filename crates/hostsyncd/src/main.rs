// # hostsyncd - Hosts Sync Daemon
//
// This daemon is a THIN integration layer: all reconciliation logic lives in
// hostsync-core.
//
// The hostsyncd daemon is responsible for:
// 1. Reading overrides from environment variables
// 2. Loading (or creating) the persisted config file
// 3. Initializing logging and the runtime
// 4. Starting the sync service with the HTTP route source
// 5. Translating process signals into stop / sync-now requests
//
// ## Configuration
//
// The base configuration lives in `<config dir>/config.json`. These
// environment variables override it:
//
// - `HOSTSYNC_CONFIG_DIR`: Config directory (default: platform config dir + `/devproxy`)
// - `HOSTSYNC_API_URL`: DevProxy API base URL (persisted to the config file)
// - `HOSTSYNC_SYNC_INTERVAL`: Seconds between cycles
// - `HOSTSYNC_HOSTS_PATH`: Target hosts file
// - `HOSTSYNC_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Signals
//
// - SIGTERM / SIGINT: stop after the current cycle
// - SIGHUP: run a cycle now
//
// ## Example
//
// ```bash
// export HOSTSYNC_API_URL=http://localhost:8090
// export HOSTSYNC_SYNC_INTERVAL=10
//
// sudo -E hostsyncd
// ```

use anyhow::{Context, Result};
use hostsync_core::config::default_config_dir;
use hostsync_core::{AgentConfig, ConfigStore, SyncEngine, SyncEvent, SyncHandle, SyncService};
use hostsync_route_http::HttpRouteSource;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, trace, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Upper bound on waiting for the worker after a stop signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum HostsyncExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<HostsyncExitCode> for ExitCode {
    fn from(code: HostsyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Overrides read from the environment
struct EnvOverrides {
    config_dir: Option<PathBuf>,
    api_url: Option<String>,
    sync_interval_secs: Option<u64>,
    hosts_path: Option<PathBuf>,
    log_level: String,
}

impl EnvOverrides {
    /// Load overrides from environment variables
    fn from_env() -> Result<Self> {
        let sync_interval_secs = match non_empty_var("HOSTSYNC_SYNC_INTERVAL") {
            Some(raw) => Some(raw.parse().with_context(|| {
                format!("HOSTSYNC_SYNC_INTERVAL must be a number of seconds. Got: {}", raw)
            })?),
            None => None,
        };

        Ok(Self {
            config_dir: non_empty_var("HOSTSYNC_CONFIG_DIR").map(PathBuf::from),
            api_url: non_empty_var("HOSTSYNC_API_URL"),
            sync_interval_secs,
            hosts_path: non_empty_var("HOSTSYNC_HOSTS_PATH").map(PathBuf::from),
            log_level: env::var("HOSTSYNC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Parse the log level
    fn log_level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "HOSTSYNC_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn main() -> ExitCode {
    let overrides = match EnvOverrides::from_env() {
        Ok(overrides) => overrides,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return HostsyncExitCode::ConfigError.into();
        }
    };

    // Initialize tracing
    let log_level = match overrides.log_level() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return HostsyncExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return HostsyncExitCode::ConfigError.into();
    }

    info!("Starting hostsyncd {}", env!("CARGO_PKG_VERSION"));

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return HostsyncExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        let config = match load_config(overrides).await {
            Ok(config) => config,
            Err(e) => {
                error!("Configuration error: {:#}", e);
                return HostsyncExitCode::ConfigError;
            }
        };

        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            HostsyncExitCode::RuntimeError
        } else {
            HostsyncExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Load the persisted config and apply the environment overrides
///
/// Only the API URL override is written back to the config file.
async fn load_config(overrides: EnvOverrides) -> Result<AgentConfig> {
    let dir = overrides.config_dir.unwrap_or_else(default_config_dir);
    let mut store = ConfigStore::init(&dir)
        .await
        .with_context(|| format!("Failed to load config from {}", dir.display()))?;
    info!("Config directory: {}", store.dir().display());

    if let Some(api_url) = overrides.api_url {
        let mut persisted = store.config().clone();
        persisted.api_url = api_url;
        store
            .update(persisted)
            .await
            .context("Failed to persist HOSTSYNC_API_URL")?;
    }

    let mut config = store.config().clone();
    if let Some(secs) = overrides.sync_interval_secs {
        config.sync_interval_secs = secs;
    }
    if let Some(path) = overrides.hosts_path {
        config.hosts_path = Some(path);
    }

    config.validate()?;
    Ok(config)
}

/// Run the daemon
async fn run_daemon(config: AgentConfig) -> Result<()> {
    info!("Route API: {}", config.routes_url());
    info!("Hosts file: {}", config.hosts_path().display());
    info!("Backups: {}", config.backup_dir().display());

    let source = HttpRouteSource::from_config(&config);
    let (engine, events) = SyncEngine::new(Box::new(source), &config)?;

    let service = SyncService::start(engine);
    tokio::spawn(log_events(events));

    let signal = wait_for_signals(service.handle()).await?;
    info!("Received shutdown signal: {}", signal);
    info!("Shutting down daemon");

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, service.stop()).await {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT),
    }

    Ok(())
}

/// Log engine events until the engine drops its sender
async fn log_events(mut events: mpsc::Receiver<SyncEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::Started { hosts_path } => {
                debug!("Sync worker started for {}", hosts_path.display());
            }
            SyncEvent::PauseChanged { paused } => {
                info!("Sync {}", if paused { "paused" } else { "resumed" });
            }
            SyncEvent::CycleStarted => trace!("Cycle started"),
            SyncEvent::CycleCompleted(outcome) => {
                debug!("Cycle completed: {:?}", outcome);
            }
            SyncEvent::Stopped { reason } => {
                debug!("Sync worker stopped: {}", reason);
            }
        }
    }
}

/// Wait for a stop signal (SIGTERM, SIGINT), serving SIGHUP meanwhile
///
/// # Returns
///
/// Returns the name of the stop signal received.
#[cfg(unix)]
async fn wait_for_signals(handle: &SyncHandle) -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;
    let mut sighup = signal(SignalKind::hangup())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGHUP handler: {}", e))?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => return Ok("SIGTERM"),
            _ = sigint.recv() => return Ok("SIGINT"),
            _ = sighup.recv() => {
                info!("SIGHUP received, syncing now");
                if !handle.sync_now() {
                    warn!("Sync already pending");
                }
            }
        }
    }
}

/// Wait for a stop signal (CTRL-C only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_signals(_handle: &SyncHandle) -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
