//! Accounting sync command

use clap::Args;
use std::sync::Arc;

use hpcsync_provisioning::membership::AccountingSync;

use super::{finish, RunContext};
use crate::backends::SacctmgrBackend;
use crate::error::{CliError, CliResult};

/// Arguments for the accounting command
#[derive(Args, Debug)]
pub struct AccountingArgs {
    /// Only these clusters (repeatable)
    #[arg(long = "cluster", value_name = "NAME")]
    pub clusters: Vec<String>,
}

/// Execute the accounting command
pub async fn execute(args: AccountingArgs, ctx: &RunContext) -> CliResult<()> {
    let section = &ctx.config.accounting;
    if let Some(unknown) = args
        .clusters
        .iter()
        .find(|c| !section.sync.clusters.contains(*c))
    {
        return Err(CliError::Usage(format!("cluster '{unknown}' is not configured")));
    }
    if ctx.start.is_some() {
        tracing::warn!("--start-timestamp is ignored: accounting sync is full-state");
    }

    let _lock = ctx.lock("accounting")?;
    let source = ctx.source()?;
    let backend = Arc::new(
        SacctmgrBackend::new(
            &section.command,
            ctx.command_runner(section.context(), section.timeout_secs),
        )
        .with_reserved(&section.reserved),
    );

    let sync = AccountingSync::new(
        source,
        backend,
        section.sync.clone().with_clusters(&args.clusters),
    )
    .with_dry_run(ctx.dry_run);

    let plan = sync.plan().await?;
    if ctx.dry_run && !ctx.json {
        for command in &plan {
            println!("{} {}", section.command, command.to_args().join(" "));
        }
    }

    let report = sync.execute_plan(&plan).await?;
    ctx.emit(&report)?;
    finish(&[report])
}
