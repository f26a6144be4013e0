//! Reconciliation engine
//!
//! The SyncEngine is responsible for:
//! - Fetching the desired route set via RouteSource
//! - Skipping writes when the desired set did not change (fingerprint)
//! - Snapshotting and rewriting the hosts file when it did
//! - Publishing the outcome of every cycle to the StatusReporter
//!
//! ## Architecture
//!
//! ```text
//!   timer ──┐      ┌── SyncHandle::sync_now()   (depth-1, coalescing)
//!           ▼      ▼
//!        ┌──────────────┐◄── SyncHandle::pause()/resume() (Command)
//!        │  SyncEngine  │◄── stop signal (oneshot)
//!        └──────────────┘
//!                │
//!      ┌─────────┼──────────────┬────────────────┐
//!      ▼         ▼              ▼                ▼
//! ┌─────────┐ ┌────────────┐ ┌───────────┐ ┌──────────────┐
//! │ Route   │ │ Backup     │ │ HostsFile │ │ Status       │
//! │ Source  │ │ Manager    │ │ (write)   │ │ Reporter     │
//! └─────────┘ └────────────┘ └───────────┘ └──────────────┘
//! ```
//!
//! ## Cycle Flow
//!
//! 1. Paused: record the pause and stop
//! 2. Fetch routes; on failure record it and leave the file alone
//! 3. Build the sorted desired entry set
//! 4. Same fingerprint as the last write: record success, no write
//! 5. Otherwise snapshot + rewrite, then prune old snapshots

mod control;

pub use control::{SyncHandle, SyncService};

use crate::backup::BackupManager;
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::hosts::{HostsFile, SectionMarkers};
use crate::status::StatusReporter;
use crate::traits::{Route, RouteSource};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, timeout};
use tracing::{debug, error, info, warn};

/// Control messages consumed by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Stop doing work until resumed
    Pause,
    /// Resume normal cycles
    Resume,
    /// Flip the paused flag
    TogglePause,
}

/// Result of one reconciliation cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The loop is paused; nothing was fetched or written
    Paused,
    /// The route source could not be read
    FetchFailed {
        error: String,
    },
    /// Desired set matches the last write; nothing was written
    Unchanged {
        route_count: usize,
    },
    /// The hosts file was rewritten
    Applied {
        route_count: usize,
    },
    /// The snapshot or the rewrite failed
    ApplyFailed {
        error: String,
    },
}

/// Events emitted by the SyncEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Worker started
    Started {
        hosts_path: PathBuf,
    },

    /// A cycle began (the worker is syncing until the matching completion)
    CycleStarted,

    /// A cycle finished
    CycleCompleted(CycleOutcome),

    /// Paused flag changed
    PauseChanged {
        paused: bool,
    },

    /// Worker stopped
    Stopped {
        reason: String,
    },
}

/// One `<ip> <hostname>` line of the managed section
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DesiredEntry {
    pub ip: IpAddr,
    pub hostname: String,
}

impl fmt::Display for DesiredEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.ip, self.hostname)
    }
}

/// Whether `domain` can be written as the hostname of a hosts entry
///
/// Dot-separated labels of ASCII letters, digits and hyphens; no label is
/// empty, longer than 63 characters, or starts/ends with a hyphen.
pub fn is_valid_hostname(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }

    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

/// Desired managed entries for a route set
///
/// One entry per enabled route with a non-blank domain, rendered as
/// `<ip> <domain>`, sorted lexicographically and deduplicated. Domains that
/// are not valid hostnames are logged and skipped.
pub fn desired_entries(routes: &[Route], ip: IpAddr) -> Vec<String> {
    let mut entries: Vec<String> = routes
        .iter()
        .filter(|route| route.enabled)
        .filter_map(|route| {
            let domain = route.domain.trim();
            if domain.is_empty() {
                return None;
            }
            if !is_valid_hostname(domain) {
                warn!(
                    "Ignoring route {} ({:?}): invalid domain {:?}",
                    route.id, route.name, domain
                );
                return None;
            }
            Some(domain)
        })
        .map(|domain| {
            DesiredEntry {
                ip,
                hostname: domain.to_string(),
            }
            .to_string()
        })
        .collect();
    entries.sort();
    entries.dedup();
    entries
}

/// Canonical form of an applied entry set
///
/// Starts empty, so an empty desired set on the very first cycle is
/// treated as already applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a sorted entry set
    pub fn of(entries: &[String]) -> Self {
        Self(entries.join("\n"))
    }
}

/// Core reconciliation engine
///
/// Owned by exactly one worker task. The worker is the only writer of the
/// fingerprint and of [`SyncStatus`](crate::status::SyncStatus); other tasks
/// interact through a cloneable [`SyncHandle`].
///
/// ## Lifecycle
///
/// 1. Create with [`SyncEngine::new()`]
/// 2. Take a [`SyncHandle`] with [`SyncEngine::handle()`]
/// 3. Drive with [`SyncEngine::run()`] (or [`SyncService::start()`])
/// 4. Send the stop signal; the worker exits at its next wait point
///
/// Cycles can also be driven by hand with [`SyncEngine::run_cycle()`] and
/// [`SyncEngine::handle_command()`], which is how the tests exercise the
/// state machine without a timer.
pub struct SyncEngine {
    /// Route source for the desired state
    source: Box<dyn RouteSource>,

    /// Target hosts file
    hosts: Arc<HostsFile>,

    /// Snapshot directory
    backups: Arc<BackupManager>,

    /// Shared status
    status: Arc<StatusReporter>,

    /// Address written for every hostname
    loopback_ip: IpAddr,

    /// Time between timer-driven cycles
    interval: Duration,

    /// Bound on one fetch
    fetch_timeout: Duration,

    /// Bound on waiting for one snapshot + write
    ///
    /// The write itself is not cancelled when this elapses: it finishes in
    /// the background while still holding the file lock.
    file_io_timeout: Duration,

    /// Snapshots kept after a write
    max_backups: usize,

    /// Fingerprint of the last successfully written entry set
    fingerprint: Fingerprint,

    paused: bool,

    command_tx: mpsc::UnboundedSender<Command>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    sync_now_tx: mpsc::Sender<()>,
    sync_now_rx: mpsc::Receiver<()>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncEngine {
    /// Create a new engine
    ///
    /// # Parameters
    ///
    /// - `source`: Route source implementation
    /// - `config`: Agent configuration
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        source: Box<dyn RouteSource>,
        config: &AgentConfig,
    ) -> Result<(Self, mpsc::Receiver<SyncEvent>)> {
        config.validate()?;

        let hosts = Arc::new(HostsFile::new(
            config.hosts_path(),
            SectionMarkers::for_product(&config.product_name),
        ));
        let backups = Arc::new(BackupManager::new(config.backup_dir()));

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        // Capacity 1: a request made while one is pending is absorbed
        let (sync_now_tx, sync_now_rx) = mpsc::channel(1);
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);

        let engine = Self {
            source,
            hosts,
            backups,
            status: Arc::new(StatusReporter::new()),
            loopback_ip: config.loopback_ip,
            interval: config.sync_interval(),
            fetch_timeout: config.fetch_timeout(),
            file_io_timeout: config.file_io_timeout(),
            max_backups: config.max_backups,
            fingerprint: Fingerprint::default(),
            paused: false,
            command_tx,
            command_rx,
            sync_now_tx,
            sync_now_rx,
            event_tx,
        };

        Ok((engine, event_rx))
    }

    /// Cloneable control and status handle for other tasks
    pub fn handle(&self) -> SyncHandle {
        SyncHandle::new(
            self.command_tx.clone(),
            self.sync_now_tx.clone(),
            Arc::clone(&self.status),
            Arc::clone(&self.hosts),
            Arc::clone(&self.backups),
        )
    }

    /// Whether the engine is paused
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Fingerprint of the last successful write
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Run the engine until `shutdown` fires (or its sender is dropped)
    ///
    /// The first cycle runs immediately. After that a cycle runs whenever
    /// the interval elapses or a sync is requested. The stop signal is only
    /// observed between cycles, so an in-flight write always completes.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        info!(
            "Starting hosts sync for {} (interval {:?})",
            self.hosts.path().display(),
            self.interval
        );
        self.emit_event(SyncEvent::Started {
            hosts_path: self.hosts.path().to_path_buf(),
        });

        let permission = self.hosts.check_permissions().await;
        if let Err(e) = &permission {
            warn!("Hosts file not writable: {}", e);
        }
        self.status.record_permission(&permission);

        self.run_cycle().await;

        let timer = tokio::time::sleep(self.interval);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }

                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command);
                }

                Some(()) = self.sync_now_rx.recv() => {
                    debug!("Sync requested");
                    self.run_cycle().await;
                    timer.as_mut().reset(Instant::now() + self.interval);
                }

                _ = &mut timer => {
                    self.run_cycle().await;
                    timer.as_mut().reset(Instant::now() + self.interval);
                }
            }
        }

        self.emit_event(SyncEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });
        info!("Hosts sync stopped");
        Ok(())
    }

    /// Apply a control command
    pub fn handle_command(&mut self, command: Command) {
        let paused = match command {
            Command::Pause => true,
            Command::Resume => false,
            Command::TogglePause => !self.paused,
        };

        if paused != self.paused {
            info!("Hosts sync {}", if paused { "paused" } else { "resumed" });
            self.paused = paused;
            self.emit_event(SyncEvent::PauseChanged { paused });
        }
        self.status.record_paused(paused);
    }

    /// Run one reconciliation cycle
    ///
    /// Never fails: every fault ends up in the returned outcome, the status
    /// and the event channel.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.emit_event(SyncEvent::CycleStarted);
        let outcome = self.reconcile().await;

        self.emit_event(SyncEvent::CycleCompleted(outcome.clone()));
        outcome
    }

    async fn reconcile(&mut self) -> CycleOutcome {
        if self.paused {
            debug!("Hosts sync paused, skipping cycle");
            self.status.record_paused(true);
            return CycleOutcome::Paused;
        }

        let routes = match self.fetch_routes().await {
            Ok(routes) => routes,
            Err(e) => {
                warn!("Failed to fetch routes from {}: {}", self.source.source_name(), e);
                self.status.record_fetch_failure(&e);
                return CycleOutcome::FetchFailed {
                    error: e.to_string(),
                };
            }
        };

        let entries = desired_entries(&routes, self.loopback_ip);
        let route_count = entries.len();
        let fingerprint = Fingerprint::of(&entries);

        if fingerprint == self.fingerprint {
            debug!("Desired entries unchanged ({}), skipping write", route_count);
            self.status.record_unchanged(route_count);
            return CycleOutcome::Unchanged { route_count };
        }

        if let Err(e) = self.write_entries(&entries).await {
            error!("Failed to update hosts file: {}", e);
            self.status.record_apply_failure(&e);
            return CycleOutcome::ApplyFailed {
                error: e.to_string(),
            };
        }

        self.fingerprint = fingerprint;

        if let Err(e) = self.backups.prune(self.max_backups).await {
            warn!("Failed to prune backups: {}", e);
        }

        self.status.record_applied(route_count);
        info!("Synced {} entries to hosts file", route_count);
        CycleOutcome::Applied { route_count }
    }

    async fn fetch_routes(&self) -> Result<Vec<Route>> {
        match timeout(self.fetch_timeout, self.source.fetch()).await {
            Ok(result) => result.map_err(|e| match e {
                Error::Fetch(_) => e,
                other => Error::fetch(other.to_string()),
            }),
            Err(_) => Err(Error::fetch(format!(
                "route fetch timed out after {:?}",
                self.fetch_timeout
            ))),
        }
    }

    /// Snapshot and rewrite the hosts file on a task of its own
    ///
    /// A timeout only stops the waiting. The task keeps the file lock until
    /// its rename is done, so a restore can never interleave with it.
    async fn write_entries(&self, entries: &[String]) -> Result<()> {
        let hosts = Arc::clone(&self.hosts);
        let backups = Arc::clone(&self.backups);
        let entries = entries.to_vec();
        let write =
            tokio::spawn(async move { hosts.apply_entries_with_backup(&entries, &backups).await });

        match timeout(self.file_io_timeout, write).await {
            Ok(Ok(result)) => result.map(|_snapshot| ()),
            Ok(Err(e)) => Err(Error::file_io(format!("hosts update task failed: {}", e))),
            Err(_) => Err(Error::file_io(format!(
                "hosts update timed out after {:?}",
                self.file_io_timeout
            ))),
        }
    }

    /// Emit an engine event
    ///
    /// Never blocks the worker: when the channel is full the event is dropped.
    fn emit_event(&self, event: SyncEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            // Nobody listens; that is fine
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
