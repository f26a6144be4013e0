// # hostsync-core
//
// Core library of the hosts file reconciliation agent.
//
// ## Architecture Overview
//
// The agent keeps a marker-delimited section of the system hosts file in
// line with a remote-declared set of routes:
// - **RouteSource**: Trait for fetching the desired route set
// - **HostsFile**: Parses and atomically rewrites the managed section
// - **BackupManager**: Snapshots the file before every write, prunes old snapshots
// - **StatusReporter**: Read-mostly sync health shared with other tasks
// - **SyncEngine**: Timer/command driven fetch → diff → write loop
//
// ## Design Principles
//
// 1. **Single Writer**: One worker task owns the state machine and all writes
// 2. **Idempotency**: A fingerprint of the last write skips redundant rewrites
// 3. **Recoverability**: Atomic rename commits and a rollback trail of backups
// 4. **Explicit Context**: Config and status are passed in, never global
// 5. **Library-First**: The daemon is a thin wrapper around this crate

pub mod backup;
pub mod config;
pub mod engine;
pub mod error;
pub mod hosts;
pub mod status;
pub mod traits;

// Re-export core types for convenience
pub use backup::{BackupInfo, BackupManager};
pub use config::{AgentConfig, ConfigStore};
pub use engine::{Command, CycleOutcome, SyncEngine, SyncEvent, SyncHandle, SyncService};
pub use error::{Error, Result};
pub use hosts::{HostsFile, SectionMarkers};
pub use status::{StatusReporter, SyncStatus};
pub use traits::{Route, RouteSource};
