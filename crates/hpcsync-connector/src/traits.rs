//! Collaborator traits
//!
//! Every system hpcsync reads from or writes to sits behind one of these
//! traits. The reconciliation core only ever sees the traits; concrete
//! clients live in their own crates or in the binary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::command::AccountingCommand;
use crate::entity::{Entity, EntityKind};
use crate::error::ConnectorResult;
use crate::operation::AttributeSet;

/// The authoritative source of identity, membership and quota state.
///
/// Implementations drain pagination before returning and must tolerate
/// concurrent readers.
#[async_trait]
pub trait SourceOfRecord: Send + Sync {
    /// Entities of `kind` modified at or after `since`.
    async fn list_modified(
        &self,
        kind: EntityKind,
        since: DateTime<Utc>,
    ) -> ConnectorResult<Vec<Entity>>;

    /// A single entity by key.
    async fn get(&self, kind: EntityKind, key: &str) -> ConnectorResult<Option<Entity>>;

    /// Dependent entities of `kind` owned by `parent`.
    async fn list_children(&self, kind: EntityKind, parent: &str)
        -> ConnectorResult<Vec<Entity>>;

    /// Every entity of `kind`.
    async fn list_all(&self, kind: EntityKind) -> ConnectorResult<Vec<Entity>>;
}

/// A directory service keyed by entity kind and stable key.
#[async_trait]
pub trait DirectoryTarget: Send + Sync {
    /// Look up a record; `None` when it does not exist.
    async fn lookup(&self, kind: EntityKind, key: &str) -> ConnectorResult<Option<AttributeSet>>;

    /// Create a record with the given attributes.
    async fn create(
        &self,
        kind: EntityKind,
        key: &str,
        attributes: &AttributeSet,
    ) -> ConnectorResult<()>;

    /// Replace a record's attributes. Attributes absent from `attributes`
    /// are removed from the record.
    async fn modify(
        &self,
        kind: EntityKind,
        key: &str,
        attributes: &AttributeSet,
    ) -> ConnectorResult<()>;
}

/// One row of the accounting database: a member attached to a grouping on
/// a cluster, or the grouping itself when `member` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Association {
    pub cluster: String,
    pub grouping: String,
    pub member: Option<String>,
}

impl Association {
    /// A grouping row.
    pub fn grouping(cluster: impl Into<String>, grouping: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            grouping: grouping.into(),
            member: None,
        }
    }

    /// A member row.
    pub fn member(
        cluster: impl Into<String>,
        grouping: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            grouping: grouping.into(),
            member: Some(member.into()),
        }
    }
}

/// The external cluster accounting tool.
#[async_trait]
pub trait AccountingBackend: Send + Sync {
    /// Current associations recorded for a cluster.
    async fn associations(&self, cluster: &str) -> ConnectorResult<Vec<Association>>;

    /// Execute one command and return its exit status.
    ///
    /// An `Err` means the command could not be run at all; a non-zero
    /// status means it ran and was rejected.
    async fn execute(&self, command: &AccountingCommand) -> ConnectorResult<i32>;
}

/// Result of an idempotent "ensure" primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ensured {
    /// The object did not exist and was created.
    Created,
    /// The object existed; its attributes were (re)applied.
    Existing,
}

/// A quota to apply on a clustered filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRequest {
    pub filesystem: String,
    /// Fileset the quota applies to; `None` for the filesystem root.
    pub fileset: Option<String>,
    /// Owning user or group name.
    pub owner: String,
    /// Whether `owner` is a group.
    pub group: bool,
    /// Soft limit in bytes.
    pub soft_bytes: u64,
    /// Hard limit in bytes.
    pub hard_bytes: u64,
}

/// Idempotent filesystem primitives.
#[async_trait]
pub trait FilesystemOps: Send + Sync {
    /// Ensure a fileset exists and is linked at `path`.
    async fn ensure_fileset(
        &self,
        filesystem: &str,
        fileset: &str,
        path: &Path,
    ) -> ConnectorResult<Ensured>;

    /// Ensure a quota is set.
    async fn ensure_quota(&self, quota: &QuotaRequest) -> ConnectorResult<Ensured>;

    /// Ensure a directory exists with the given owner and mode.
    async fn ensure_directory(
        &self,
        path: &Path,
        owner: &str,
        mode: u32,
    ) -> ConnectorResult<Ensured>;
}

/// Message delivery. Best-effort: callers log failures and carry on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> ConnectorResult<()>;
}

/// Revokes the access artifact of an identifier whose grace period ended.
#[async_trait]
pub trait Revoker: Send + Sync {
    async fn revoke(&self, identifier: &str) -> ConnectorResult<()>;
}
