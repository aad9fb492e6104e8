//! Grace-period purge command

use chrono::Utc;
use clap::Args;
use std::sync::Arc;
use tracing::{error, info};

use hpcsync_connector::traits::AccountingBackend;
use hpcsync_provisioning::purge::{GracePeriodPurge, PurgeCacheFile, SourceRecipientResolver};
use hpcsync_provisioning::RunLock;

use super::{finish, RunContext};
use crate::backends::{AccountingRevoker, SacctmgrBackend, SendmailNotifier};
use crate::config::PurgePolicyConfig;
use crate::error::{CliError, CliResult};
use crate::process::ExecutionContext;

/// Arguments for the purge command
#[derive(Args, Debug)]
pub struct PurgeArgs {
    /// Only these policies (repeatable)
    #[arg(long = "policy", value_name = "NAME")]
    pub policies: Vec<String>,
}

impl PurgeArgs {
    pub fn select<'a>(&self, configured: &'a [PurgePolicyConfig]) -> CliResult<Vec<&'a PurgePolicyConfig>> {
        if configured.is_empty() {
            return Err(CliError::Config("no purge policies configured".to_string()));
        }
        if let Some(unknown) = self
            .policies
            .iter()
            .find(|name| !configured.iter().any(|p| &p.policy.name == *name))
        {
            return Err(CliError::Usage(format!("unknown purge policy '{unknown}'")));
        }
        Ok(configured
            .iter()
            .filter(|p| self.policies.is_empty() || self.policies.contains(&p.policy.name))
            .collect())
    }
}

/// Take the locks a run of `policy` needs.
///
/// Revocations go through the accounting backend, so a real run also holds
/// the accounting lock and never overlaps `hpcsync accounting`.
fn policy_locks(ctx: &RunContext, policy: &str) -> CliResult<Vec<RunLock>> {
    let mut locks = vec![ctx.lock(&format!("purge-{policy}"))?];
    if !ctx.dry_run {
        locks.push(ctx.lock("accounting")?);
    }
    Ok(locks)
}

/// Execute the purge command
///
/// Policies run one after the other; a policy that fails outright does not
/// stop the others.
pub async fn execute(args: PurgeArgs, ctx: &RunContext) -> CliResult<()> {
    let config = &ctx.config;
    let selected = args.select(&config.purge.policies)?;

    let source = ctx.source()?;
    let backend: Arc<dyn AccountingBackend> = Arc::new(
        SacctmgrBackend::new(
            &config.accounting.command,
            ctx.command_runner(config.accounting.context(), config.accounting.timeout_secs),
        )
        .with_reserved(&config.accounting.reserved),
    );
    let notifier = Arc::new(SendmailNotifier::new(
        &config.mail.sendmail,
        &config.mail.sender,
        ctx.command_runner(ExecutionContext::Current, 60),
    ));

    let mut reports = Vec::new();
    let mut first_error = None;

    for entry in selected {
        let name = &entry.policy.name;
        let result = async {
            let _locks = policy_locks(ctx, name)?;
            let revoker = Arc::new(AccountingRevoker::new(
                Arc::clone(&backend),
                entry.revoke_grouping(),
                config.purge_clusters().to_vec(),
            ));
            let resolver = Arc::new(
                SourceRecipientResolver::new(Arc::clone(&source))
                    .with_attribute(&entry.recipient_attribute),
            );
            let purge = GracePeriodPurge::new(
                Arc::clone(&source),
                notifier.clone(),
                revoker,
                resolver,
                entry.policy.clone(),
                PurgeCacheFile::for_policy(&config.state_dir, name),
            )
            .with_dry_run(ctx.dry_run);
            info!(policy = %name, dry_run = ctx.dry_run, "Starting purge");
            Ok::<_, CliError>(purge.run(Utc::now()).await?)
        }
        .await;

        match result {
            Ok(report) => {
                ctx.emit(&report)?;
                reports.push(report);
            }
            Err(e) => {
                error!(policy = %name, error = %e, "Purge policy failed");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => finish(&reports),
    }
}
