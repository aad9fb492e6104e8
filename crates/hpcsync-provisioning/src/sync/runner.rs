//! Windowed run orchestration.
//!
//! A run reads the checkpoint, builds the window `[last, now)`, fetches the
//! changes, hands them to a [`WindowedSync`] and advances the checkpoint
//! only when every entity reconciled without error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use hpcsync_connector::entity::EntityKind;

use super::fetcher::{ChangeSet, ChangeSetFetcher};
use super::outcome::OutcomeReport;
use super::report::RunReport;
use super::window::ChangeWindow;
use crate::checkpoint::CheckpointStore;
use crate::error::SyncResult;

/// A target system reconciled over change windows.
#[async_trait]
pub trait WindowedSync: Send + Sync {
    /// Target name, used for the checkpoint and lock files.
    fn target(&self) -> &str;

    /// Kinds to fetch, in processing order.
    fn kinds(&self) -> Vec<EntityKind>;

    /// Reconcile a change set. Per-entity failures are recorded as `ERROR`
    /// outcomes; an `Err` aborts the run.
    async fn reconcile(&self, changes: &ChangeSet, dry_run: bool) -> SyncResult<OutcomeReport>;
}

/// Runs a [`WindowedSync`] against its checkpoint.
pub struct SyncRunner {
    fetcher: ChangeSetFetcher,
    checkpoint: Arc<dyn CheckpointStore>,
    default_start: DateTime<Utc>,
    start_override: Option<DateTime<Utc>>,
    dry_run: bool,
}

impl SyncRunner {
    /// Create a runner.
    pub fn new(
        fetcher: ChangeSetFetcher,
        checkpoint: Arc<dyn CheckpointStore>,
        default_start: DateTime<Utc>,
    ) -> Self {
        Self {
            fetcher,
            checkpoint,
            default_start,
            start_override: None,
            dry_run: false,
        }
    }

    /// Enable dry-run mode: nothing is written and the checkpoint stays.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Start the window here instead of at the checkpoint.
    #[must_use]
    pub fn with_start_override(mut self, start: Option<DateTime<Utc>>) -> Self {
        self.start_override = start;
        self
    }

    /// Check if dry-run mode is enabled.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Window start: the override, else the checkpoint, else the default.
    fn window_start(&self) -> DateTime<Utc> {
        if let Some(start) = self.start_override {
            return start;
        }
        match self.checkpoint.read() {
            Ok(last) => last,
            Err(e) if e.is_cold_start() => {
                warn!(
                    error = %e,
                    default_start = %self.default_start,
                    "No usable checkpoint, starting from the default"
                );
                self.default_start
            }
            Err(e) => {
                warn!(
                    error = %e,
                    default_start = %self.default_start,
                    "Could not read checkpoint, starting from the default"
                );
                self.default_start
            }
        }
    }

    /// Run one window ending at `now`.
    #[instrument(skip(self, sync), fields(target = %sync.target(), dry_run = self.dry_run))]
    pub async fn run(&self, sync: &dyn WindowedSync, now: DateTime<Utc>) -> SyncResult<RunReport> {
        let window = ChangeWindow::new(self.window_start(), now)?;
        let mut report = RunReport::start(sync.target(), self.dry_run).with_window(window);
        info!(run_id = %report.run_id, window = %window, "Starting run");

        let changes = self.fetcher.fetch_kinds(&sync.kinds(), &window).await?;
        let outcomes = sync.reconcile(&changes, self.dry_run).await?;
        report.absorb(&outcomes);

        if self.dry_run {
            info!(run_id = %report.run_id, "Dry run: checkpoint not advanced");
        } else if outcomes.has_errors() {
            warn!(
                run_id = %report.run_id,
                errors = outcomes.error_count(),
                "Run had errors, checkpoint not advanced"
            );
        } else {
            self.checkpoint.write(window.now())?;
            report.checkpoint_advanced = true;
        }

        report.finish();
        Ok(report)
    }
}
