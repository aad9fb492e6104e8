//! Upsert reconciler.
//!
//! Create-if-absent, full-replace-if-present against a directory target.
//! There is no retry inside a run: a failed entity keeps its modification
//! timestamp and is picked up again by the next window that covers it.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use hpcsync_connector::entity::EntityKind;
use hpcsync_connector::operation::AttributeSet;
use hpcsync_connector::traits::DirectoryTarget;

use super::outcome::SyncOutcome;

/// Upserts complete attribute sets into a directory target.
pub struct UpsertReconciler {
    target: Arc<dyn DirectoryTarget>,
}

impl UpsertReconciler {
    /// Create a reconciler for a target.
    pub fn new(target: Arc<dyn DirectoryTarget>) -> Self {
        Self { target }
    }

    /// Reconcile one record.
    ///
    /// `attributes` must be the complete desired state. Existing records are
    /// always rewritten and reported `UPDATED`; attributes are not compared
    /// first. In dry-run the lookup still happens so the reported outcome
    /// matches what a real run would do, but nothing is written.
    #[instrument(skip(self, attributes))]
    pub async fn reconcile(
        &self,
        kind: EntityKind,
        key: &str,
        attributes: &AttributeSet,
        dry_run: bool,
    ) -> SyncOutcome {
        let existing = match self.target.lookup(kind, key).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(kind = %kind, key = %key, error = %e, "Lookup failed");
                return SyncOutcome::Error;
            }
        };

        match existing {
            None => {
                if dry_run {
                    info!(kind = %kind, key = %key, attributes = ?attributes, "Dry run: would create");
                    return SyncOutcome::New;
                }
                match self.target.create(kind, key, attributes).await {
                    Ok(()) => {
                        info!(kind = %kind, key = %key, "Created");
                        SyncOutcome::New
                    }
                    Err(e) => {
                        warn!(kind = %kind, key = %key, error = %e, "Create failed");
                        SyncOutcome::Error
                    }
                }
            }
            Some(_) => {
                if dry_run {
                    info!(kind = %kind, key = %key, attributes = ?attributes, "Dry run: would replace");
                    return SyncOutcome::Updated;
                }
                match self.target.modify(kind, key, attributes).await {
                    Ok(()) => {
                        info!(kind = %kind, key = %key, "Updated");
                        SyncOutcome::Updated
                    }
                    Err(e) => {
                        warn!(kind = %kind, key = %key, error = %e, "Modify failed");
                        SyncOutcome::Error
                    }
                }
            }
        }
    }
}
