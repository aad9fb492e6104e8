//! CLI command implementations

pub mod accounting;
pub mod check;
pub mod directory;
pub mod purge;
pub mod storage;

use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use hpcsync_connector::traits::SourceOfRecord;
use hpcsync_connector_rest::RestSourceOfRecord;
use hpcsync_provisioning::checkpoint::{CheckpointStore, FileCheckpointStore};
use hpcsync_provisioning::sync::{ChangeSetFetcher, RunReport, SyncRunner};
use hpcsync_provisioning::RunLock;

use crate::config::Config;
use crate::error::{CliError, CliResult};
use crate::process::{CommandRunner, ExecutionContext};

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: Config,
    pub dry_run: bool,
    pub json: bool,
    /// Explicit window start, overriding the checkpoint.
    pub start: Option<DateTime<Utc>>,
}

impl RunContext {
    pub fn source(&self) -> CliResult<Arc<dyn SourceOfRecord>> {
        Ok(Arc::new(RestSourceOfRecord::new(self.config.source.clone())?))
    }

    /// Take the run lock for `target`, creating the state directory first.
    pub fn lock(&self, target: &str) -> CliResult<RunLock> {
        std::fs::create_dir_all(&self.config.state_dir)?;
        Ok(RunLock::acquire(RunLock::path_for(
            &self.config.state_dir,
            target,
        ))?)
    }

    pub fn checkpoint(&self, name: &str) -> Arc<dyn CheckpointStore> {
        Arc::new(FileCheckpointStore::for_target(&self.config.state_dir, name))
    }

    /// Windowed runner whose checkpoint is stored under `checkpoint_name`.
    pub fn runner(&self, source: Arc<dyn SourceOfRecord>, checkpoint_name: &str) -> SyncRunner {
        SyncRunner::new(
            ChangeSetFetcher::new(source),
            self.checkpoint(checkpoint_name),
            self.config.default_start,
        )
        .with_dry_run(self.dry_run)
        .with_start_override(self.start)
    }

    pub fn command_runner(&self, context: ExecutionContext, timeout_secs: u64) -> CommandRunner {
        CommandRunner::new(context, Duration::from_secs(timeout_secs))
    }

    /// Log the report and print it to stdout.
    pub fn emit(&self, report: &RunReport) -> CliResult<()> {
        report.log();
        if self.json {
            println!("{}", serde_json::to_string_pretty(report)?);
        } else {
            print!("{}", format_report(report));
        }
        Ok(())
    }
}

/// Map finished reports to the process result.
pub fn finish(reports: &[RunReport]) -> CliResult<()> {
    match reports.iter().find(|r| r.has_errors()) {
        Some(report) => Err(CliError::PartialFailure {
            target: report.target.clone(),
            errors: reports
                .iter()
                .map(|r| {
                    r.errors.len()
                        + r.purge.as_ref().map_or(0, |p| p.revoke_failures)
                })
                .sum(),
        }),
        None => Ok(()),
    }
}

/// Checkpoint name for a target restricted to a selection.
///
/// Different selections keep separate checkpoints, so a partial run never
/// moves the window of what it did not look at.
pub fn checkpoint_name(target: &str, selection: &[&str]) -> String {
    if selection.is_empty() {
        target.to_string()
    } else {
        format!("{}-{}", target, selection.join("+"))
    }
}

/// Parse a start timestamp: RFC 3339, or `YYYYMMDDHHMMSS` with an optional
/// trailing `Z`, taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    let compact = value.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(compact, "%Y%m%d%H%M%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| {
            format!("'{value}' is neither RFC 3339 nor YYYYMMDDHHMMSS")
        })
}

/// Human-readable report.
pub fn format_report(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} run {}{}",
        report.target,
        report.run_id,
        if report.dry_run { " (dry run)" } else { "" }
    );
    if let Some(window) = &report.window {
        let _ = writeln!(out, "  window: {window}");
    }
    for (kind, counts) in &report.outcomes {
        let _ = writeln!(
            out,
            "  {:<10} new={} updated={} done={} error={}",
            kind.as_str(),
            counts.new,
            counts.updated,
            counts.done,
            counts.error
        );
    }
    for label in &report.errors {
        let _ = writeln!(out, "  failed: {label}");
    }
    if let Some(commands) = &report.commands {
        let _ = writeln!(
            out,
            "  commands: {} planned, {} executed",
            commands.planned, commands.executed
        );
    }
    if let Some(purge) = &report.purge {
        let _ = writeln!(
            out,
            "  warned={} escalated={} purged={} reinstated={}",
            purge.warned.len(),
            purge.escalated.len(),
            purge.purged.len(),
            purge.reinstated.len()
        );
        if purge.notification_failures > 0 || purge.revoke_failures > 0 {
            let _ = writeln!(
                out,
                "  notification failures={} revoke failures={}",
                purge.notification_failures, purge.revoke_failures
            );
        }
    }
    if report.window.is_some() {
        let _ = writeln!(
            out,
            "  checkpoint: {}",
            if report.checkpoint_advanced {
                "advanced"
            } else {
                "unchanged"
            }
        );
    }
    out
}
