//! Storage synchronization.
//!
//! Makes sure every changed account has its directories on each configured
//! filesystem, and applies changed user and VO quotas. All filesystem
//! primitives are idempotent, so a re-run over the same window is harmless.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use hpcsync_connector::entity::{Entity, EntityKind};
use hpcsync_connector::error::{ConnectorError, ConnectorResult};
use hpcsync_connector::traits::{Ensured, FilesystemOps, QuotaRequest};

use super::fetcher::ChangeSet;
use super::outcome::{OutcomeReport, SyncOutcome};
use super::runner::WindowedSync;
use crate::error::SyncResult;

/// Quota entity attribute naming the storage it applies to.
pub const STORAGE_ATTRIBUTE: &str = "storage";
/// Quota entity attribute with the hard limit in bytes.
pub const HARD_ATTRIBUTE: &str = "hard";
/// Quota entity attribute with the soft limit in bytes.
pub const SOFT_ATTRIBUTE: &str = "soft";
/// Quota entity attribute naming the fileset.
pub const FILESET_ATTRIBUTE: &str = "fileset";

/// A quota as described by a `UserQuota` or `VoQuota` entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSpec {
    /// Owning account or VO.
    pub owner: String,
    /// Storage name, matched against [`FilesystemLayout::name`].
    pub storage: String,
    pub soft_bytes: u64,
    pub hard_bytes: u64,
    /// Explicit fileset, if the quota names one.
    pub fileset: Option<String>,
    /// Whether the owner is a VO.
    pub group: bool,
}

impl QuotaSpec {
    /// Parse a quota entity. The soft limit defaults to the hard limit.
    pub fn from_entity(entity: &Entity) -> ConnectorResult<Self> {
        let group = match entity.kind {
            EntityKind::UserQuota => false,
            EntityKind::VoQuota => true,
            other => {
                return Err(ConnectorError::invalid_data(format!(
                    "{other} {} is not a quota",
                    entity.key
                )))
            }
        };
        let owner = entity.parent.clone().ok_or_else(|| {
            ConnectorError::invalid_data(format!("quota {} has no owner", entity.key))
        })?;
        let storage = entity
            .attributes
            .get_string(STORAGE_ATTRIBUTE)
            .ok_or_else(|| {
                ConnectorError::invalid_data(format!("quota {} has no storage", entity.key))
            })?
            .to_string();
        let hard = entity
            .attributes
            .get_integer(HARD_ATTRIBUTE)
            .ok_or_else(|| {
                ConnectorError::invalid_data(format!("quota {} has no hard limit", entity.key))
            })?;
        let soft = entity.attributes.get_integer(SOFT_ATTRIBUTE).unwrap_or(hard);
        let inconsistent = || {
            ConnectorError::invalid_data(format!(
                "quota {} has inconsistent limits soft={soft} hard={hard}",
                entity.key
            ))
        };
        let hard_bytes = u64::try_from(hard).map_err(|_| inconsistent())?;
        let soft_bytes = u64::try_from(soft).map_err(|_| inconsistent())?;
        if soft_bytes > hard_bytes {
            return Err(inconsistent());
        }

        Ok(Self {
            owner,
            storage,
            soft_bytes,
            hard_bytes,
            fileset: entity
                .attributes
                .get_string(FILESET_ATTRIBUTE)
                .map(String::from),
            group,
        })
    }

    /// Name of the directory attribute carrying this quota.
    pub fn directory_attribute(&self) -> String {
        format!("{}Quota", self.storage)
    }

    /// Hard limit as stored in the directory, which holds signed integers.
    pub fn directory_hard_limit(&self) -> ConnectorResult<i64> {
        i64::try_from(self.hard_bytes).map_err(|_| {
            ConnectorError::invalid_data(format!(
                "quota of {} on {} exceeds the directory range: {}",
                self.owner, self.storage, self.hard_bytes
            ))
        })
    }
}

/// Where one named storage lives and how paths on it are built.
///
/// Path templates substitute `{key}` with the account or VO name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemLayout {
    /// Storage name as used by quota entities (e.g. "home", "data").
    pub name: String,
    /// Filesystem device name.
    pub filesystem: String,
    /// Template for per-account directories; no directories when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_path: Option<String>,
    /// Template for VO fileset link points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vo_path: Option<String>,
    /// Mode for created directories.
    #[serde(default = "default_directory_mode")]
    pub directory_mode: u32,
}

fn default_directory_mode() -> u32 {
    0o700
}

impl FilesystemLayout {
    fn render(template: &str, key: &str) -> PathBuf {
        PathBuf::from(template.replace("{key}", key))
    }

    /// Directory for an account, if this storage hosts them.
    pub fn user_directory(&self, account: &str) -> Option<PathBuf> {
        self.user_path.as_deref().map(|t| Self::render(t, account))
    }

    /// Fileset link point for a VO, if this storage hosts them.
    pub fn vo_directory(&self, vo: &str) -> Option<PathBuf> {
        self.vo_path.as_deref().map(|t| Self::render(t, vo))
    }
}

/// Combine ensure results into one outcome.
fn outcome_of(results: &[Ensured]) -> SyncOutcome {
    if results.contains(&Ensured::Created) {
        SyncOutcome::New
    } else {
        SyncOutcome::Updated
    }
}

/// Synchronizes directories and quotas onto clustered filesystems.
pub struct StorageSync {
    fs: Arc<dyn FilesystemOps>,
    layouts: Vec<FilesystemLayout>,
    kinds: Vec<EntityKind>,
}

impl StorageSync {
    /// Create a storage sync over the given filesystems.
    pub fn new(fs: Arc<dyn FilesystemOps>, layouts: Vec<FilesystemLayout>) -> Self {
        Self {
            fs,
            layouts,
            kinds: vec![EntityKind::Account, EntityKind::UserQuota, EntityKind::VoQuota],
        }
    }

    /// Restrict the kinds processed.
    #[must_use]
    pub fn with_kinds(mut self, kinds: &[EntityKind]) -> Self {
        self.kinds.retain(|k| kinds.contains(k));
        self
    }

    /// Names of the configured storages.
    pub fn storage_names(&self) -> Vec<&str> {
        self.layouts.iter().map(|l| l.name.as_str()).collect()
    }

    async fn sync_account(&self, account: &Entity, dry_run: bool) -> SyncOutcome {
        let mut results = Vec::new();
        for layout in &self.layouts {
            let Some(path) = layout.user_directory(&account.key) else {
                continue;
            };
            if dry_run {
                info!(
                    account = %account.key,
                    path = %path.display(),
                    mode = format!("{:o}", layout.directory_mode),
                    "Dry run: would ensure directory"
                );
                continue;
            }
            match self
                .fs
                .ensure_directory(&path, &account.key, layout.directory_mode)
                .await
            {
                Ok(ensured) => results.push(ensured),
                Err(e) => {
                    warn!(account = %account.key, path = %path.display(), error = %e, "Failed to ensure directory");
                    return SyncOutcome::Error;
                }
            }
        }
        outcome_of(&results)
    }

    async fn sync_quota(&self, quota: &Entity, dry_run: bool) -> Option<SyncOutcome> {
        let spec = match QuotaSpec::from_entity(quota) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(kind = %quota.kind, key = %quota.key, error = %e, "Invalid quota");
                return Some(SyncOutcome::Error);
            }
        };
        let Some(layout) = self.layouts.iter().find(|l| l.name == spec.storage) else {
            // Quota for a storage this run does not manage.
            return None;
        };

        let fileset = match (&spec.fileset, spec.group) {
            (Some(name), _) => Some(name.clone()),
            (None, true) => Some(spec.owner.clone()),
            (None, false) => None,
        };
        let request = QuotaRequest {
            filesystem: layout.filesystem.clone(),
            fileset: fileset.clone(),
            owner: spec.owner.clone(),
            group: spec.group,
            soft_bytes: spec.soft_bytes,
            hard_bytes: spec.hard_bytes,
        };

        if dry_run {
            info!(key = %quota.key, quota = ?request, "Dry run: would ensure quota");
            return Some(SyncOutcome::Updated);
        }

        let mut results = Vec::new();
        if spec.group {
            if let (Some(name), Some(path)) = (&fileset, layout.vo_directory(&spec.owner)) {
                match self.fs.ensure_fileset(&layout.filesystem, name, &path).await {
                    Ok(ensured) => results.push(ensured),
                    Err(e) => {
                        warn!(vo = %spec.owner, fileset = %name, error = %e, "Failed to ensure fileset");
                        return Some(SyncOutcome::Error);
                    }
                }
            }
        }

        match self.fs.ensure_quota(&request).await {
            Ok(ensured) => results.push(ensured),
            Err(e) => {
                warn!(key = %quota.key, owner = %spec.owner, error = %e, "Failed to ensure quota");
                return Some(SyncOutcome::Error);
            }
        }

        Some(outcome_of(&results))
    }
}

#[async_trait]
impl WindowedSync for StorageSync {
    fn target(&self) -> &str {
        "storage"
    }

    fn kinds(&self) -> Vec<EntityKind> {
        self.kinds.clone()
    }

    #[instrument(skip(self, changes), fields(window = %changes.window()))]
    async fn reconcile(&self, changes: &ChangeSet, dry_run: bool) -> SyncResult<OutcomeReport> {
        let mut report = OutcomeReport::new();

        for kind in &self.kinds {
            for entity in changes.get(*kind) {
                let outcome = match kind {
                    EntityKind::Account => Some(self.sync_account(entity, dry_run).await),
                    EntityKind::UserQuota | EntityKind::VoQuota => {
                        self.sync_quota(entity, dry_run).await
                    }
                    _ => None,
                };
                if let Some(outcome) = outcome {
                    report.record(*kind, entity.key.clone(), outcome);
                }
            }

            let counts = report.counts(*kind);
            info!(
                kind = %kind,
                new = counts.new,
                updated = counts.updated,
                error = counts.error,
                "Storage sync finished kind"
            );
        }

        Ok(report)
    }
}
