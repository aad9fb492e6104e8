//! Durable purge state.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::state::PurgeeRecord;
use crate::checkpoint::{read_json, write_json_atomic};
use crate::error::{SyncError, SyncResult};

/// What a purge policy remembers between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeCache {
    /// Eligible identifiers seen by the previous run.
    #[serde(default)]
    pub previous_eligible_set: BTreeSet<String>,
    /// Identifiers currently being warned.
    #[serde(default)]
    pub purgees: BTreeMap<String, PurgeeRecord>,
}

impl PurgeCache {
    /// Whether this is a cold start with nothing remembered.
    pub fn is_empty(&self) -> bool {
        self.previous_eligible_set.is_empty() && self.purgees.is_empty()
    }
}

/// File holding one policy's [`PurgeCache`].
#[derive(Debug, Clone)]
pub struct PurgeCacheFile {
    path: PathBuf,
}

impl PurgeCacheFile {
    /// Cache at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache for policy `name` inside `state_dir` (`purge-<name>.json`).
    pub fn for_policy(state_dir: &Path, name: &str) -> Self {
        Self::new(state_dir.join(format!("purge-{name}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cache. A missing or unreadable cache is a cold start.
    pub fn load(&self) -> PurgeCache {
        match read_json::<PurgeCache>(&self.path) {
            Ok(Some(cache)) => {
                debug!(
                    path = %self.path.display(),
                    previous = cache.previous_eligible_set.len(),
                    purgees = cache.purgees.len(),
                    "Loaded purge cache"
                );
                cache
            }
            Ok(None) => {
                warn!(path = %self.path.display(), "No purge cache, starting cold");
                PurgeCache::default()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unusable purge cache, starting cold");
                PurgeCache::default()
            }
        }
    }

    /// Replace the cache atomically.
    pub fn save(&self, cache: &PurgeCache) -> SyncResult<()> {
        write_json_atomic(&self.path, cache).map_err(|e| {
            SyncError::cache(format!("could not write {}: {e}", self.path.display()))
        })
    }
}
