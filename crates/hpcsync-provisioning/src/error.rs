//! Sync error types.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

use hpcsync_connector::error::ConnectorError;

/// Errors reading or writing a checkpoint.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// No checkpoint has been written yet.
    #[error("no checkpoint at {}", path.display())]
    NotFound { path: PathBuf },

    /// The checkpoint exists but cannot be parsed.
    #[error("corrupt checkpoint at {}: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },

    /// I/O error.
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CheckpointError {
    /// Whether the caller should fall back to the default start instant.
    pub fn is_cold_start(&self) -> bool {
        matches!(
            self,
            CheckpointError::NotFound { .. } | CheckpointError::Corrupt { .. }
        )
    }
}

/// Errors that abort a synchronization run.
///
/// Per-entity failures are not errors at this level: they are recorded as
/// `ERROR` outcomes and the run carries on.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Connector error.
    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// Checkpoint error.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Purge cache error.
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// An accounting command exited non-zero; the rest of the batch was
    /// not attempted.
    #[error("Command #{index} '{command}' exited with status {status}")]
    CommandFailed {
        index: usize,
        command: String,
        status: i32,
    },

    /// Another run holds the lock.
    #[error("Run lock {} is held{}", path.display(), holder.map(|pid| format!(" by pid {pid}")).unwrap_or_default())]
    Locked { path: PathBuf, holder: Option<u32> },

    /// Invalid change window.
    #[error("Invalid change window: start {last} is after end {now}")]
    InvalidWindow {
        last: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a command failure.
    pub fn command_failed(index: usize, command: impl Into<String>, status: i32) -> Self {
        Self::CommandFailed {
            index,
            command: command.into(),
            status,
        }
    }

    /// Whether this error should page an operator.
    ///
    /// Configuration and window errors are usage mistakes; everything else
    /// means the run did not complete.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SyncError::Configuration { .. } | SyncError::InvalidWindow { .. }
        )
    }

}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::command_failed(2, "add user vsc40001 Cluster=doduo", 1);
        let text = err.to_string();
        assert!(text.contains("#2"));
        assert!(text.contains("vsc40001"));
        assert!(text.contains("status 1"));

        let err = SyncError::Locked {
            path: PathBuf::from("/var/lib/hpcsync/directory.lock"),
            holder: Some(4242),
        };
        assert!(err.to_string().contains("pid 4242"));
    }

    #[test]
    fn test_is_fatal() {
        assert!(SyncError::command_failed(0, "x", 1).is_fatal());
        assert!(SyncError::cache("unwritable").is_fatal());
        assert!(!SyncError::configuration("no clusters").is_fatal());
    }

    #[test]
    fn test_checkpoint_cold_start() {
        let missing = CheckpointError::NotFound {
            path: PathBuf::from("x"),
        };
        assert!(missing.is_cold_start());
        let io = CheckpointError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert!(!io.is_cold_start());
    }
}
