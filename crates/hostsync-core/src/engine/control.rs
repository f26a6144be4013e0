//! Control surface shared with request-handling tasks

use super::{Command, SyncEngine};
use crate::backup::{BackupInfo, BackupManager};
use crate::error::{Error, Result};
use crate::hosts::HostsFile;
use crate::status::{StatusReporter, SyncStatus};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Cloneable handle to a [`SyncEngine`]
///
/// Every method except the file helpers returns immediately. Commands sent
/// after the worker stopped are silently dropped.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    sync_now: mpsc::Sender<()>,
    status: Arc<StatusReporter>,
    hosts: Arc<HostsFile>,
    backups: Arc<BackupManager>,
}

impl SyncHandle {
    pub(super) fn new(
        commands: mpsc::UnboundedSender<Command>,
        sync_now: mpsc::Sender<()>,
        status: Arc<StatusReporter>,
        hosts: Arc<HostsFile>,
        backups: Arc<BackupManager>,
    ) -> Self {
        Self {
            commands,
            sync_now,
            status,
            hosts,
            backups,
        }
    }

    /// Pause the loop
    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    /// Resume the loop
    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    /// Flip the paused flag
    pub fn toggle_pause(&self) {
        self.send(Command::TogglePause);
    }

    /// Request an out-of-band cycle
    ///
    /// Returns `false` when a request was already pending (this one is
    /// absorbed into it) or the worker is gone.
    pub fn sync_now(&self) -> bool {
        match self.sync_now.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                tracing::debug!("Sync already pending, request absorbed");
                false
            }
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    /// Current status snapshot
    pub fn status(&self) -> SyncStatus {
        self.status.snapshot()
    }

    /// Target hosts file path
    pub fn hosts_path(&self) -> &Path {
        self.hosts.path()
    }

    /// Entries currently in the managed section
    pub async fn managed_entries(&self) -> Result<Vec<String>> {
        self.hosts.managed_entries().await
    }

    /// Available backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        self.backups.list().await
    }

    /// Restore the hosts file from a backup
    ///
    /// `backup` is either a snapshot name or a path inside the backup
    /// directory. The restore shares the write lock with the worker.
    pub async fn restore_backup(&self, backup: impl AsRef<Path>) -> Result<()> {
        self.backups.restore(&self.hosts, backup.as_ref()).await
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Sync worker stopped, dropping {:?}", command);
        }
    }
}

/// A [`SyncEngine`] running on its own task
///
/// # Example
///
/// ```rust,no_run
/// use hostsync_core::{AgentConfig, SyncEngine, SyncService};
/// # use hostsync_core::{Route, RouteSource};
/// # struct Fixed;
/// # #[async_trait::async_trait]
/// # impl RouteSource for Fixed {
/// #     async fn fetch(&self) -> hostsync_core::Result<Vec<Route>> { Ok(vec![]) }
/// # }
///
/// #[tokio::main]
/// async fn main() -> hostsync_core::Result<()> {
///     let (engine, _events) = SyncEngine::new(Box::new(Fixed), &AgentConfig::default())?;
///     let service = SyncService::start(engine);
///
///     service.handle().sync_now();
///     println!("{:?}", service.handle().status());
///
///     service.stop().await
/// }
/// ```
pub struct SyncService {
    handle: SyncHandle,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl SyncService {
    /// Spawn the engine's worker on the current runtime
    pub fn start(engine: SyncEngine) -> Self {
        let handle = engine.handle();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(engine.run(shutdown_rx));

        Self {
            handle,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Control and status handle
    pub fn handle(&self) -> &SyncHandle {
        &self.handle
    }

    /// Signal the worker and wait until it has exited
    ///
    /// A cycle in progress finishes first; no new cycle starts.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        self.task
            .await
            .map_err(|e| Error::Other(format!("sync worker failed: {}", e)))?
    }
}
