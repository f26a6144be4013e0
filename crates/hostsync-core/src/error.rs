//! Error types for the hosts sync agent
//!
//! Every failure the reconciliation loop can hit maps onto one of these
//! variants. The loop never propagates them past the worker; they end up in
//! [`SyncStatus::last_error`](crate::status::SyncStatus) instead.

use thiserror::Error;

/// Result type alias for hostsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the hosts sync agent
#[derive(Error, Debug)]
pub enum Error {
    /// Network, transport or decode failure talking to the route source
    #[error("fetch error: {0}")]
    Fetch(String),

    /// The target file cannot be opened for read-write
    #[error("permission denied: {0}")]
    Permission(String),

    /// Read, write or rename failure on the target or its temp file
    #[error("file I/O error: {0}")]
    FileIo(String),

    /// The backup directory or a snapshot could not be written
    #[error("backup error: {0}")]
    Backup(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a fetch error
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create a permission error
    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    /// Create a file I/O error
    pub fn file_io(msg: impl Into<String>) -> Self {
        Self::FileIo(msg.into())
    }

    /// Create a backup error
    pub fn backup(msg: impl Into<String>) -> Self {
        Self::Backup(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify an I/O failure on the target file
    ///
    /// `PermissionDenied` becomes [`Error::Permission`], anything else
    /// [`Error::FileIo`]. `context` is prefixed to the message.
    pub fn from_io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            Self::Permission(format!("{}: {}", context, err))
        } else {
            Self::FileIo(format!("{}: {}", context, err))
        }
    }

    /// Returns `true` for errors caused by missing privileges on the target
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Permission(_))
    }

    /// Returns `true` if the next scheduled cycle is expected to retry
    ///
    /// Configuration and serialization problems do not go away by waiting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Fetch(_) | Self::FileIo(_) | Self::Backup(_) | Self::Permission(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn permission_denied_io_is_classified_as_permission() {
        let err = Error::from_io(
            "open /etc/hosts",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.is_permission_denied());
        assert!(err.to_string().contains("open /etc/hosts"));
    }

    #[test]
    fn other_io_is_classified_as_file_io() {
        let err = Error::from_io("rename", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(matches!(err, Error::FileIo(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn config_errors_are_not_retryable() {
        assert!(!Error::config("bad").is_retryable());
    }
}
