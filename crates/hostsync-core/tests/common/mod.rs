//! Test doubles and common utilities for the contract tests
//!
//! The route source is fully scripted by the test; the hosts file and the
//! backup directory live in a temp directory.

#![allow(dead_code)]

use hostsync_core::error::{Error, Result};
use hostsync_core::{AgentConfig, Route, RouteSource, SyncHandle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Initial content used for the target file in most tests
pub const BASE_HOSTS: &str = "127.0.0.1 localhost\n::1 localhost\n";

/// A route source whose answer the test controls
#[derive(Clone)]
pub struct ScriptedRouteSource {
    /// Next answer: routes, or the message of a fetch failure
    response: Arc<Mutex<std::result::Result<Vec<Route>, String>>>,
    /// Call counter for fetch()
    fetch_count: Arc<AtomicUsize>,
    /// Artificial latency per fetch
    delay: Arc<Mutex<Option<Duration>>>,
}

impl ScriptedRouteSource {
    /// Create a source answering with `routes`
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            response: Arc::new(Mutex::new(Ok(routes))),
            fetch_count: Arc::new(AtomicUsize::new(0)),
            delay: Arc::new(Mutex::new(None)),
        }
    }

    /// Answer subsequent fetches with `routes`
    pub fn set_routes(&self, routes: Vec<Route>) {
        *self.response.lock().unwrap() = Ok(routes);
    }

    /// Fail subsequent fetches with `message`
    pub fn fail_with(&self, message: &str) {
        *self.response.lock().unwrap() = Err(message.to_string());
    }

    /// Sleep this long inside every fetch
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Get the number of times fetch() was called
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RouteSource for ScriptedRouteSource {
    async fn fetch(&self) -> Result<Vec<Route>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.response
            .lock()
            .unwrap()
            .clone()
            .map_err(Error::fetch)
    }

    fn source_name(&self) -> &'static str {
        "scripted"
    }
}

/// Enabled routes for the given domains
pub fn routes(domains: &[&str]) -> Vec<Route> {
    domains.iter().map(|d| Route::new(*d)).collect()
}

/// A temp directory holding a hosts file and a backup directory
pub struct TestEnv {
    pub dir: TempDir,
    pub hosts_path: PathBuf,
    pub backup_dir: PathBuf,
}

impl TestEnv {
    /// Create the environment with `initial` as hosts file content
    pub fn new(initial: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let hosts_path = dir.path().join("hosts");
        let backup_dir = dir.path().join("backups");
        std::fs::write(&hosts_path, initial).expect("write hosts");

        Self {
            dir,
            hosts_path,
            backup_dir,
        }
    }

    /// Config pointing the engine at this environment
    pub fn config(&self) -> AgentConfig {
        AgentConfig {
            hosts_path: Some(self.hosts_path.clone()),
            backup_dir: Some(self.backup_dir.clone()),
            sync_interval_secs: 1,
            ..AgentConfig::default()
        }
    }

    /// Current hosts file content
    pub fn hosts_content(&self) -> String {
        std::fs::read_to_string(&self.hosts_path).expect("read hosts")
    }

    /// Snapshot file names in the backup directory
    pub fn backup_names(&self) -> Vec<String> {
        let Ok(dir) = std::fs::read_dir(&self.backup_dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Write a snapshot with a fixed name and age
    pub fn seed_backup(&self, name: &str, content: &str, age: Duration) -> PathBuf {
        std::fs::create_dir_all(&self.backup_dir).expect("create backup dir");
        let path = self.backup_dir.join(name);
        std::fs::write(&path, content).expect("write backup");
        let file = std::fs::File::options()
            .write(true)
            .open(&path)
            .expect("open backup");
        file.set_modified(std::time::SystemTime::now() - age)
            .expect("set mtime");
        path
    }
}

/// Poll `handle`'s status until `predicate` holds or `within` elapses
pub async fn wait_for_status(
    handle: &SyncHandle,
    within: Duration,
    predicate: impl Fn(&hostsync_core::SyncStatus) -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if predicate(&handle.status()) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
