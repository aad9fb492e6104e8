//! Fail-fast execution of accounting command batches.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};

use hpcsync_connector::command::AccountingCommand;
use hpcsync_connector::traits::AccountingBackend;

use crate::error::{SyncError, SyncResult};

/// Summary of a command batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Number of commands in the batch.
    pub planned: usize,
    /// Number of commands that ran and succeeded.
    pub executed: usize,
    /// Whether the batch was only printed.
    pub dry_run: bool,
}

/// Executes command lists in order, stopping at the first failure.
pub struct BatchExecutor {
    backend: Arc<dyn AccountingBackend>,
    dry_run: bool,
}

impl BatchExecutor {
    /// Create an executor.
    pub fn new(backend: Arc<dyn AccountingBackend>) -> Self {
        Self {
            backend,
            dry_run: false,
        }
    }

    /// Enable dry-run mode: commands are logged, never run.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Execute `commands` sequentially.
    ///
    /// A non-zero status aborts the batch with [`SyncError::CommandFailed`];
    /// later commands are never issued. Nothing already applied is rolled
    /// back: the next run recomputes the diff from the resulting state.
    #[instrument(skip(self, commands), fields(count = commands.len(), dry_run = self.dry_run))]
    pub async fn execute(&self, commands: &[AccountingCommand]) -> SyncResult<BatchSummary> {
        let mut summary = BatchSummary {
            planned: commands.len(),
            executed: 0,
            dry_run: self.dry_run,
        };

        if self.dry_run {
            for command in commands {
                info!(command = %command, "Dry run: would execute");
            }
            return Ok(summary);
        }

        for (index, command) in commands.iter().enumerate() {
            let status = self.backend.execute(command).await?;
            if status != 0 {
                error!(
                    index,
                    command = %command,
                    status,
                    skipped = commands.len() - index - 1,
                    "Accounting command failed, aborting batch"
                );
                return Err(SyncError::command_failed(index, command.to_string(), status));
            }
            info!(command = %command, "Executed");
            summary.executed += 1;
        }

        Ok(summary)
    }
}
