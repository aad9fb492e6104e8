//! Run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

use hpcsync_connector::entity::EntityKind;

use super::outcome::{OutcomeCounts, OutcomeReport};
use super::window::ChangeWindow;
use crate::membership::BatchSummary;
use crate::purge::PurgeSummary;

/// Summary of one run against one target system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run ID.
    pub run_id: Uuid,
    /// Target system name.
    pub target: String,
    /// Whether writes were suppressed.
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Window reconciled; absent for full-state runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<ChangeWindow>,
    /// Outcome counts per kind.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub outcomes: BTreeMap<EntityKind, OutcomeCounts>,
    /// `kind:key` labels of failed entities.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<String>,
    /// Whether the checkpoint moved to the window end.
    pub checkpoint_advanced: bool,
    /// Accounting command batch, for accounting runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<BatchSummary>,
    /// Purge transitions, for purge runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purge: Option<PurgeSummary>,
}

impl RunReport {
    /// Start a report for `target`.
    #[must_use]
    pub fn start(target: impl Into<String>, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target: target.into(),
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            window: None,
            outcomes: BTreeMap::new(),
            errors: Vec::new(),
            checkpoint_advanced: false,
            commands: None,
            purge: None,
        }
    }

    /// Attach the window.
    #[must_use]
    pub fn with_window(mut self, window: ChangeWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Copy counts and errors from an outcome report.
    pub fn absorb(&mut self, outcomes: &OutcomeReport) {
        self.outcomes = outcomes.all_counts();
        self.errors = outcomes.errors();
    }

    /// Mark the run finished.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Whether any entity, command or purge step failed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
            || self.purge.as_ref().is_some_and(PurgeSummary::has_failures)
    }

    /// Log the report at the end of a run.
    pub fn log(&self) {
        for (kind, counts) in &self.outcomes {
            info!(
                run_id = %self.run_id,
                target = %self.target,
                kind = %kind,
                new = counts.new,
                updated = counts.updated,
                done = counts.done,
                error = counts.error,
                "Outcome counts"
            );
        }
        if let Some(commands) = &self.commands {
            info!(
                run_id = %self.run_id,
                planned = commands.planned,
                executed = commands.executed,
                "Accounting commands"
            );
        }
        if let Some(purge) = &self.purge {
            info!(
                run_id = %self.run_id,
                warned = purge.warned.len(),
                escalated = purge.escalated.len(),
                purged = purge.purged.len(),
                reinstated = purge.reinstated.len(),
                notification_failures = purge.notification_failures,
                revoke_failures = purge.revoke_failures,
                "Purge transitions"
            );
        }
        for label in &self.errors {
            warn!(run_id = %self.run_id, entity = %label, "Failed to reconcile");
        }
        info!(
            run_id = %self.run_id,
            target = %self.target,
            dry_run = self.dry_run,
            checkpoint_advanced = self.checkpoint_advanced,
            "Run finished"
        );
    }
}
