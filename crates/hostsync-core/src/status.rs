//! Live sync status shared with collaborators
//!
//! The worker is the only writer. Readers (UI, API handlers, signal
//! handlers) take cheap snapshots under a read lock that is never held
//! across file or network I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

/// Snapshot of the agent's sync health
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Whether the last fetch from the route source succeeded
    pub connected: bool,
    /// End of the last successful cycle
    pub last_sync: Option<DateTime<Utc>>,
    /// Message of the most recent failure, cleared by a successful cycle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Number of entries in the current desired set
    pub route_count: usize,
    /// Whether the loop is paused
    pub paused: bool,
    /// Whether the target file is writable by this process
    pub has_permission: bool,
}

/// Thread-safe holder of the current [`SyncStatus`]
#[derive(Debug, Default)]
pub struct StatusReporter {
    inner: RwLock<SyncStatus>,
}

impl StatusReporter {
    /// Create a reporter with an all-default status
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current status
    pub fn snapshot(&self) -> SyncStatus {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut SyncStatus)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }

    pub(crate) fn record_paused(&self, paused: bool) {
        self.update(|s| s.paused = paused);
    }

    pub(crate) fn record_permission(&self, result: &crate::Result<()>) {
        self.update(|s| match result {
            Ok(()) => s.has_permission = true,
            Err(e) => {
                s.has_permission = false;
                s.last_error = Some(e.to_string());
            }
        });
    }

    pub(crate) fn record_fetch_failure(&self, error: &crate::Error) {
        self.update(|s| {
            s.connected = false;
            s.last_error = Some(error.to_string());
        });
    }

    pub(crate) fn record_unchanged(&self, route_count: usize) {
        self.update(|s| {
            s.connected = true;
            s.last_sync = Some(Utc::now());
            s.last_error = None;
            s.route_count = route_count;
        });
    }

    pub(crate) fn record_applied(&self, route_count: usize) {
        self.update(|s| {
            s.connected = true;
            s.has_permission = true;
            s.last_sync = Some(Utc::now());
            s.last_error = None;
            s.route_count = route_count;
        });
    }

    pub(crate) fn record_apply_failure(&self, error: &crate::Error) {
        self.update(|s| {
            s.connected = true;
            s.has_permission = false;
            s.last_error = Some(format!("hosts update failed: {}", error));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn fetch_failure_keeps_route_count() {
        let reporter = StatusReporter::new();
        reporter.record_applied(3);
        reporter.record_fetch_failure(&Error::fetch("connection refused"));

        let status = reporter.snapshot();
        assert!(!status.connected);
        assert_eq!(status.route_count, 3);
        assert!(status.has_permission);
        assert!(status.last_error.unwrap().contains("connection refused"));
    }

    #[test]
    fn success_clears_last_error() {
        let reporter = StatusReporter::new();
        reporter.record_apply_failure(&Error::permission("denied"));
        assert!(!reporter.snapshot().has_permission);

        reporter.record_applied(1);
        let status = reporter.snapshot();
        assert!(status.has_permission);
        assert!(status.connected);
        assert!(status.last_error.is_none());
        assert!(status.last_sync.is_some());
    }

    #[test]
    fn serializes_with_snake_case_fields() {
        let reporter = StatusReporter::new();
        reporter.record_paused(true);
        let json = serde_json::to_value(reporter.snapshot()).unwrap();
        assert_eq!(json["paused"], true);
        assert_eq!(json["has_permission"], false);
        assert!(json.get("last_error").is_none());
    }
}
