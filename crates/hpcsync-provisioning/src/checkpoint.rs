//! Checkpoint store.
//!
//! A checkpoint is the end instant of the last change window whose run
//! finished with zero errors. The next run's window starts there.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::CheckpointError;

/// Trait for checkpoint storage backends.
pub trait CheckpointStore: Send + Sync {
    /// Read the last successful synchronization instant.
    fn read(&self) -> Result<DateTime<Utc>, CheckpointError>;

    /// Persist a new synchronization instant. Readers see either the old or
    /// the new value, never a partial one.
    fn write(&self, timestamp: DateTime<Utc>) -> Result<(), CheckpointError>;
}

/// On-disk checkpoint document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CheckpointFile {
    timestamp: DateTime<Utc>,
}

/// File-based checkpoint store: one JSON document per target system.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for `target` inside `state_dir` (`<target>.checkpoint.json`).
    pub fn for_target(state_dir: &Path, target: &str) -> Self {
        Self::new(state_dir.join(format!("{target}.checkpoint.json")))
    }

    /// Path of the checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn read(&self) -> Result<DateTime<Utc>, CheckpointError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound {
                    path: self.path.clone(),
                })
            }
            Err(e) => return Err(CheckpointError::Io(e)),
        };

        serde_json::from_str::<CheckpointFile>(&contents)
            .map(|file| file.timestamp)
            .map_err(|e| CheckpointError::Corrupt {
                path: self.path.clone(),
                message: e.to_string(),
            })
    }

    fn write(&self, timestamp: DateTime<Utc>) -> Result<(), CheckpointError> {
        write_json_atomic(&self.path, &CheckpointFile { timestamp })?;
        debug!(path = %self.path.display(), timestamp = %timestamp, "Checkpoint written");
        Ok(())
    }
}

/// Write `value` as JSON to `path` through a temporary file in the same
/// directory, then rename it into place.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CheckpointError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let contents = serde_json::to_vec_pretty(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CheckpointError::Io(e.error))?;
    Ok(())
}

/// Read a JSON document; `Ok(None)` when the file does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CheckpointError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CheckpointError::Io(e)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| CheckpointError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}
