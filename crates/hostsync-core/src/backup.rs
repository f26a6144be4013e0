// # Hosts File Backups
//
// Full-file snapshots of the target taken before every mutation.
//
// ## Naming
//
// `hosts_<YYYYmmdd_HHMMSS>.bak`, local time at second resolution. Two
// snapshots taken within the same second share a name and the later one
// overwrites the earlier one.
//
// ## Retention
//
// Snapshots are ordered by modification time. `prune(keep)` deletes all but
// the `keep` newest; `keep == 0` deletes every snapshot.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{Error, Result};
use crate::hosts::HostsFile;

const BACKUP_PREFIX: &str = "hosts_";
const BACKUP_SUFFIX: &str = ".bak";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Metadata of one snapshot on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    /// File name (`hosts_<timestamp>.bak`)
    pub name: String,
    /// Full path
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: DateTime<Utc>,
}

/// Snapshot file name for a given instant
pub fn backup_file_name(at: DateTime<Local>) -> String {
    format!("{}{}{}", BACKUP_PREFIX, at.format(TIMESTAMP_FORMAT), BACKUP_SUFFIX)
}

/// Whether `name` follows the snapshot naming scheme
pub fn is_backup_name(name: &str) -> bool {
    name.len() > BACKUP_PREFIX.len() + BACKUP_SUFFIX.len()
        && name.starts_with(BACKUP_PREFIX)
        && name.ends_with(BACKUP_SUFFIX)
}

/// Manages the snapshot directory
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
}

impl BackupManager {
    /// Create a manager for `dir` (created lazily on first snapshot)
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Snapshot directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `content` to a new timestamped snapshot
    ///
    /// The bytes are stored as-is; no encoding is assumed.
    pub async fn snapshot(&self, content: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::backup(format!(
                "Failed to create backup directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let path = self.dir.join(backup_file_name(Local::now()));
        fs::write(&path, content).await.map_err(|e| {
            Error::backup(format!(
                "Failed to write backup {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::debug!("Backed up hosts file to {}", path.display());
        Ok(path)
    }

    /// All snapshots, newest first
    ///
    /// A missing directory yields an empty list.
    pub async fn list(&self) -> Result<Vec<BackupInfo>> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::backup(format!(
                    "Failed to read backup directory {}: {}",
                    self.dir.display(),
                    e
                )));
            }
        };

        let mut backups = Vec::new();
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(Error::backup(format!(
                        "Failed to read backup directory {}: {}",
                        self.dir.display(),
                        e
                    )));
                }
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_backup_name(&name) {
                continue;
            }

            // Entries that vanish or cannot be stat'ed are skipped
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };

            backups.push(BackupInfo {
                name,
                path: entry.path(),
                size: metadata.len(),
                modified: DateTime::<Utc>::from(modified),
            });
        }

        backups.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(backups)
    }

    /// Delete all but the `keep` newest snapshots
    ///
    /// Individual deletion failures are logged and skipped. Returns the
    /// number of snapshots removed.
    pub async fn prune(&self, keep: usize) -> Result<usize> {
        let backups = self.list().await?;
        let mut removed = 0;

        for backup in backups.iter().skip(keep) {
            match fs::remove_file(&backup.path).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(
                    "Failed to remove old backup {}: {}",
                    backup.path.display(),
                    e
                ),
            }
        }

        if removed > 0 {
            tracing::debug!("Pruned {} old backup(s), keeping {}", removed, keep);
        }
        Ok(removed)
    }

    /// Restore `hosts` from the snapshot at `backup`
    ///
    /// See [`HostsFile::restore_from`].
    pub async fn restore(&self, hosts: &HostsFile, backup: &Path) -> Result<()> {
        hosts.restore_from(backup, self).await
    }

    /// Resolve a collaborator-supplied snapshot reference
    ///
    /// Accepts a bare snapshot name or a path directly inside the backup
    /// directory. Anything else is rejected so a restore can only ever
    /// write content this manager produced.
    pub(crate) fn resolve(&self, backup: &Path) -> Result<PathBuf> {
        let name = backup
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if !is_backup_name(&name) {
            return Err(Error::backup(format!(
                "{} is not a hosts backup",
                backup.display()
            )));
        }

        match backup.parent() {
            Some(parent) if parent.as_os_str().is_empty() || parent == self.dir => {
                Ok(self.dir.join(name))
            }
            _ => Err(Error::backup(format!(
                "{} is outside the backup directory {}",
                backup.display(),
                self.dir.display()
            ))),
        }
    }
}
