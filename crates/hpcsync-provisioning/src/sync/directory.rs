//! Directory synchronization.
//!
//! Accounts, groups and VOs each map to one directory record. Public keys
//! and quotas have no record of their own: they are folded into their
//! parent's record, so a changed dependent is handled by reconciling its
//! parent with a freshly computed attribute set.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use hpcsync_connector::entity::{Entity, EntityKind};
use hpcsync_connector::error::ConnectorResult;
use hpcsync_connector::operation::AttributeSet;
use hpcsync_connector::traits::{DirectoryTarget, SourceOfRecord};

use super::fetcher::ChangeSet;
use super::outcome::{OutcomeReport, SyncOutcome};
use super::runner::WindowedSync;
use super::storage::QuotaSpec;
use super::upsert::UpsertReconciler;
use crate::error::SyncResult;

/// Source attribute listing a group's members.
pub const MEMBERS_ATTRIBUTE: &str = "members";
/// Directory attribute carrying group membership.
pub const MEMBER_UID_ATTRIBUTE: &str = "memberUid";
/// Attribute carrying a public key, both upstream and in the directory.
pub const PUBKEY_ATTRIBUTE: &str = "pubkey";

/// Synchronizes changed entities into a directory target.
pub struct DirectorySync {
    source: Arc<dyn SourceOfRecord>,
    reconciler: UpsertReconciler,
    kinds: Vec<EntityKind>,
    skip_attributes: Vec<String>,
}

impl DirectorySync {
    /// Create a directory sync over every entity kind.
    pub fn new(source: Arc<dyn SourceOfRecord>, target: Arc<dyn DirectoryTarget>) -> Self {
        Self {
            source,
            reconciler: UpsertReconciler::new(target),
            kinds: EntityKind::ALL.to_vec(),
            skip_attributes: Vec::new(),
        }
    }

    /// Restrict the kinds processed. Processing order stays the canonical
    /// one regardless of the order given here.
    #[must_use]
    pub fn with_kinds(mut self, kinds: &[EntityKind]) -> Self {
        self.kinds = EntityKind::ALL
            .into_iter()
            .filter(|k| kinds.contains(k))
            .collect();
        self
    }

    /// Source attributes never written to the directory.
    #[must_use]
    pub fn with_skip_attributes(mut self, names: Vec<String>) -> Self {
        self.skip_attributes = names;
        self
    }

    /// Complete desired attribute set for a top-level entity.
    async fn desired_attributes(&self, entity: &Entity) -> ConnectorResult<AttributeSet> {
        let mut attrs = entity.attributes.clone();
        for name in &self.skip_attributes {
            attrs.remove(name);
        }

        match entity.kind {
            EntityKind::Account => {
                let pubkeys: Vec<String> = self
                    .source
                    .list_children(EntityKind::Pubkey, &entity.key)
                    .await?
                    .into_iter()
                    .filter(|k| !k.deleted)
                    .filter_map(|k| k.attributes.get_string(PUBKEY_ATTRIBUTE).map(String::from))
                    .collect();
                attrs.set(PUBKEY_ATTRIBUTE, pubkeys);
                self.add_quota_attributes(&mut attrs, EntityKind::UserQuota, &entity.key)
                    .await?;
            }
            EntityKind::Vo => {
                move_members(&mut attrs);
                self.add_quota_attributes(&mut attrs, EntityKind::VoQuota, &entity.key)
                    .await?;
            }
            EntityKind::Group => move_members(&mut attrs),
            EntityKind::Pubkey | EntityKind::UserQuota | EntityKind::VoQuota => {}
        }

        Ok(attrs)
    }

    async fn add_quota_attributes(
        &self,
        attrs: &mut AttributeSet,
        kind: EntityKind,
        parent: &str,
    ) -> ConnectorResult<()> {
        for quota in self.source.list_children(kind, parent).await? {
            if quota.deleted {
                continue;
            }
            let spec = QuotaSpec::from_entity(&quota)?;
            attrs.set(spec.directory_attribute(), spec.directory_hard_limit()?);
        }
        Ok(())
    }

    /// Reconcile a top-level entity and record its outcome.
    async fn reconcile_entity(
        &self,
        entity: &Entity,
        dry_run: bool,
        report: &mut OutcomeReport,
    ) -> SyncOutcome {
        let outcome = match self.desired_attributes(entity).await {
            Ok(attrs) => {
                self.reconciler
                    .reconcile(entity.kind, &entity.key, &attrs, dry_run)
                    .await
            }
            Err(e) => {
                warn!(
                    kind = %entity.kind,
                    key = %entity.key,
                    error = %e,
                    "Could not compute desired attributes"
                );
                SyncOutcome::Error
            }
        };
        report.record(entity.kind, entity.key.clone(), outcome);
        outcome
    }

    /// Handle a changed dependent: `DONE` if its parent was already
    /// reconciled in this run, otherwise reconcile the parent now.
    async fn reconcile_dependent(
        &self,
        entity: &Entity,
        dry_run: bool,
        report: &mut OutcomeReport,
    ) -> SyncOutcome {
        let (Some(parent_kind), Some(parent_key)) = (entity.kind.parent_kind(), &entity.parent)
        else {
            warn!(kind = %entity.kind, key = %entity.key, "Dependent entity without a parent");
            return SyncOutcome::Error;
        };

        if report.contains(parent_kind, parent_key) {
            debug!(
                kind = %entity.kind,
                key = %entity.key,
                parent = %parent_key,
                "Parent already reconciled"
            );
            return SyncOutcome::Done;
        }

        match self.source.get(parent_kind, parent_key).await {
            Ok(Some(parent)) => self.reconcile_entity(&parent, dry_run, report).await,
            Ok(None) => {
                warn!(
                    kind = %entity.kind,
                    key = %entity.key,
                    parent = %parent_key,
                    "Parent no longer exists upstream"
                );
                SyncOutcome::Error
            }
            Err(e) => {
                warn!(
                    kind = %entity.kind,
                    key = %entity.key,
                    parent = %parent_key,
                    error = %e,
                    "Could not fetch parent"
                );
                SyncOutcome::Error
            }
        }
    }
}

/// Replace the upstream member list with the directory membership attribute.
fn move_members(attrs: &mut AttributeSet) {
    let members: Vec<String> = attrs
        .get_strings(MEMBERS_ATTRIBUTE)
        .into_iter()
        .map(String::from)
        .collect();
    attrs.remove(MEMBERS_ATTRIBUTE);
    attrs.set(MEMBER_UID_ATTRIBUTE, members);
}

#[async_trait]
impl WindowedSync for DirectorySync {
    fn target(&self) -> &str {
        "directory"
    }

    fn kinds(&self) -> Vec<EntityKind> {
        self.kinds.clone()
    }

    #[instrument(skip(self, changes), fields(window = %changes.window()))]
    async fn reconcile(&self, changes: &ChangeSet, dry_run: bool) -> SyncResult<OutcomeReport> {
        let mut report = OutcomeReport::new();

        for kind in &self.kinds {
            for entity in changes.get(*kind) {
                let outcome = if kind.is_dependent() {
                    let outcome = self.reconcile_dependent(entity, dry_run, &mut report).await;
                    report.record(*kind, entity.key.clone(), outcome);
                    outcome
                } else {
                    self.reconcile_entity(entity, dry_run, &mut report).await
                };
                debug!(kind = %kind, key = %entity.key, outcome = %outcome, "Reconciled");
            }

            let counts = report.counts(*kind);
            info!(
                kind = %kind,
                new = counts.new,
                updated = counts.updated,
                done = counts.done,
                error = counts.error,
                "Directory sync finished kind"
            );
        }

        Ok(report)
    }
}
