//! Manual mock collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use hpcsync_connector::command::AccountingCommand;
use hpcsync_connector::entity::{Entity, EntityKind};
use hpcsync_connector::error::{ConnectorError, ConnectorResult};
use hpcsync_connector::operation::AttributeSet;
use hpcsync_connector::traits::{
    AccountingBackend, Association, DirectoryTarget, Ensured, FilesystemOps, Notifier,
    QuotaRequest, Revoker, SourceOfRecord,
};
use hpcsync_provisioning::checkpoint::CheckpointStore;
use hpcsync_provisioning::error::CheckpointError;
use hpcsync_provisioning::purge::RecipientResolver;

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

// =============================================================================
// Source-of-record
// =============================================================================

/// In-memory source-of-record.
#[derive(Default)]
pub struct MemorySource {
    entities: Mutex<Vec<Entity>>,
    pub list_modified_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, entity: Entity) -> Self {
        self.put(entity);
        self
    }

    /// Insert or replace an entity.
    pub fn put(&self, entity: Entity) {
        let mut entities = self.entities.lock().unwrap();
        entities.retain(|e| !(e.kind == entity.kind && e.key == entity.key));
        entities.push(entity);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceOfRecord for MemorySource {
    async fn list_modified(
        &self,
        kind: EntityKind,
        since: DateTime<Utc>,
    ) -> ConnectorResult<Vec<Entity>> {
        self.list_modified_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind && e.modified >= since)
            .cloned()
            .collect())
    }

    async fn get(&self, kind: EntityKind, key: &str) -> ConnectorResult<Option<Entity>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.kind == kind && e.key == key)
            .cloned())
    }

    async fn list_children(
        &self,
        kind: EntityKind,
        parent: &str,
    ) -> ConnectorResult<Vec<Entity>> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind && e.parent.as_deref() == Some(parent))
            .cloned()
            .collect())
    }

    async fn list_all(&self, kind: EntityKind) -> ConnectorResult<Vec<Entity>> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Directory
// =============================================================================

/// In-memory directory with full-replace modify.
#[derive(Default)]
pub struct MemoryDirectory {
    records: Mutex<BTreeMap<(EntityKind, String), AttributeSet>>,
    fail_keys: Mutex<Vec<String>>,
    pub create_calls: AtomicUsize,
    pub modify_calls: AtomicUsize,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write for `key` fail.
    pub fn failing_on(self, key: &str) -> Self {
        self.fail_keys.lock().unwrap().push(key.to_string());
        self
    }

    pub fn record(&self, kind: EntityKind, key: &str) -> Option<AttributeSet> {
        self.records
            .lock()
            .unwrap()
            .get(&(kind, key.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn modify_calls(&self) -> usize {
        self.modify_calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.create_calls() + self.modify_calls()
    }

    fn check(&self, key: &str) -> ConnectorResult<()> {
        if self.fail_keys.lock().unwrap().iter().any(|k| k == key) {
            return Err(ConnectorError::operation_failed(format!("rejected {key}")));
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryTarget for MemoryDirectory {
    async fn lookup(&self, kind: EntityKind, key: &str) -> ConnectorResult<Option<AttributeSet>> {
        Ok(self.record(kind, key))
    }

    async fn create(
        &self,
        kind: EntityKind,
        key: &str,
        attributes: &AttributeSet,
    ) -> ConnectorResult<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check(key)?;
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&(kind, key.to_string())) {
            return Err(ConnectorError::ObjectAlreadyExists {
                identifier: key.to_string(),
            });
        }
        records.insert((kind, key.to_string()), attributes.clone());
        Ok(())
    }

    async fn modify(
        &self,
        kind: EntityKind,
        key: &str,
        attributes: &AttributeSet,
    ) -> ConnectorResult<()> {
        self.modify_calls.fetch_add(1, Ordering::SeqCst);
        self.check(key)?;
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&(kind, key.to_string())) {
            Some(record) => {
                *record = attributes.clone();
                Ok(())
            }
            None => Err(ConnectorError::ObjectNotFound {
                identifier: key.to_string(),
            }),
        }
    }
}

// =============================================================================
// Checkpoint
// =============================================================================

/// In-memory checkpoint store.
#[derive(Default)]
pub struct MemoryCheckpoint {
    value: Mutex<Option<DateTime<Utc>>>,
    pub writes: AtomicUsize,
}

impl MemoryCheckpoint {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            value: Mutex::new(Some(timestamp)),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn value(&self) -> Option<DateTime<Utc>> {
        *self.value.lock().unwrap()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl CheckpointStore for MemoryCheckpoint {
    fn read(&self) -> Result<DateTime<Utc>, CheckpointError> {
        self.value().ok_or_else(|| CheckpointError::NotFound {
            path: PathBuf::from("memory"),
        })
    }

    fn write(&self, timestamp: DateTime<Utc>) -> Result<(), CheckpointError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.value.lock().unwrap() = Some(timestamp);
        Ok(())
    }
}

// =============================================================================
// Accounting
// =============================================================================

/// Accounting backend returning scripted statuses.
#[derive(Default)]
pub struct ScriptedAccounting {
    associations: Mutex<Vec<Association>>,
    /// Zero-based index of the command that returns a non-zero status.
    fail_at: Mutex<Option<usize>>,
    executed: Mutex<Vec<AccountingCommand>>,
    pub execute_calls: AtomicUsize,
}

impl ScriptedAccounting {
    pub fn new(associations: Vec<Association>) -> Self {
        Self {
            associations: Mutex::new(associations),
            ..Self::default()
        }
    }

    pub fn failing_at(self, index: usize) -> Self {
        *self.fail_at.lock().unwrap() = Some(index);
        self
    }

    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<AccountingCommand> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountingBackend for ScriptedAccounting {
    async fn associations(&self, cluster: &str) -> ConnectorResult<Vec<Association>> {
        Ok(self
            .associations
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.cluster == cluster)
            .cloned()
            .collect())
    }

    async fn execute(&self, command: &AccountingCommand) -> ConnectorResult<i32> {
        let index = self.execute_calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(command.clone());
        if *self.fail_at.lock().unwrap() == Some(index) {
            return Ok(1);
        }
        Ok(0)
    }
}

// =============================================================================
// Filesystem
// =============================================================================

/// Filesystem that remembers what exists.
#[derive(Default)]
pub struct MemoryFilesystem {
    directories: Mutex<Vec<PathBuf>>,
    filesets: Mutex<Vec<String>>,
    quotas: Mutex<Vec<QuotaRequest>>,
    pub calls: AtomicUsize,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn directories(&self) -> Vec<PathBuf> {
        self.directories.lock().unwrap().clone()
    }

    pub fn quotas(&self) -> Vec<QuotaRequest> {
        self.quotas.lock().unwrap().clone()
    }
}

#[async_trait]
impl FilesystemOps for MemoryFilesystem {
    async fn ensure_fileset(
        &self,
        _filesystem: &str,
        fileset: &str,
        _path: &Path,
    ) -> ConnectorResult<Ensured> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut filesets = self.filesets.lock().unwrap();
        if filesets.iter().any(|f| f == fileset) {
            return Ok(Ensured::Existing);
        }
        filesets.push(fileset.to_string());
        Ok(Ensured::Created)
    }

    async fn ensure_quota(&self, quota: &QuotaRequest) -> ConnectorResult<Ensured> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut quotas = self.quotas.lock().unwrap();
        quotas.retain(|q| !(q.owner == quota.owner && q.fileset == quota.fileset));
        quotas.push(quota.clone());
        Ok(Ensured::Existing)
    }

    async fn ensure_directory(
        &self,
        path: &Path,
        _owner: &str,
        _mode: u32,
    ) -> ConnectorResult<Ensured> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut directories = self.directories.lock().unwrap();
        if directories.iter().any(|d| d == path) {
            return Ok(Ensured::Existing);
        }
        directories.push(path.to_path_buf());
        Ok(Ensured::Created)
    }
}

// =============================================================================
// Purge side effects
// =============================================================================

/// Notifier that records every message.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// `(recipient, subject)` pairs.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipient: &str, subject: &str, _body: &str) -> ConnectorResult<()> {
        if self.fail {
            return Err(ConnectorError::command_failed("sendmail", "exit status 75"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), subject.to_string()));
        Ok(())
    }
}

/// Revoker that records identifiers, optionally failing.
#[derive(Default)]
pub struct RecordingRevoker {
    revoked: Mutex<Vec<String>>,
    fail: bool,
    pub calls: AtomicUsize,
}

impl RecordingRevoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Revoker for RecordingRevoker {
    async fn revoke(&self, identifier: &str) -> ConnectorResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ConnectorError::TargetUnavailable {
                message: "accounting database locked".to_string(),
            });
        }
        self.revoked.lock().unwrap().push(identifier.to_string());
        Ok(())
    }
}

/// Resolves `<identifier>@example.org`.
pub struct DomainResolver;

#[async_trait]
impl RecipientResolver for DomainResolver {
    async fn resolve(&self, identifier: &str) -> ConnectorResult<Option<String>> {
        Ok(Some(format!("{identifier}@example.org")))
    }
}
