//! hpcsync - keeps HPC identity systems converged on the source-of-record
//!
//! Each subcommand reconciles one target system:
//! - `directory`: accounts, groups, VOs and their keys and quotas into LDAP
//! - `storage`: home/data/scratch directories, VO filesets and quotas
//! - `accounting`: VO memberships into the cluster accounting database
//! - `purge`: grace-period removal of members that lost eligibility

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hpcsync_cli::commands::{self, RunContext};
use hpcsync_cli::config::{Config, ENV_CONFIG};
use hpcsync_cli::error::CliResult;
use hpcsync_cli::logging;

/// hpcsync - identity, membership and quota reconciliation
#[derive(Parser)]
#[command(name = "hpcsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    config: Option<PathBuf>,

    /// Report what would change without changing anything
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print the run report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Window start overriding the checkpoint (RFC 3339 or YYYYMMDDHHMMSS)
    #[arg(long, global = true, value_parser = commands::parse_timestamp)]
    start_timestamp: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync changed entities into the directory
    Directory(commands::directory::DirectoryArgs),

    /// Sync directories, filesets and quotas onto the filesystems
    Storage(commands::storage::StorageArgs),

    /// Sync VO memberships into the accounting database
    Accounting(commands::accounting::AccountingArgs),

    /// Run grace-period purge policies
    Purge(commands::purge::PurgeArgs),

    /// Validate the configuration and print it with secrets masked
    Check(commands::check::CheckArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = run(cli).await;

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, exit_code = e.exit_code(), critical = e.is_critical(), "Run failed");
            e.print();
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(&path)?;
    logging::init_logging(&config.logging, cli.verbose);

    let ctx = RunContext {
        config,
        dry_run: cli.dry_run,
        json: cli.json,
        start: cli.start_timestamp,
    };

    match cli.command {
        Commands::Directory(args) => commands::directory::execute(args, &ctx).await,
        Commands::Storage(args) => commands::storage::execute(args, &ctx).await,
        Commands::Accounting(args) => commands::accounting::execute(args, &ctx).await,
        Commands::Purge(args) => commands::purge::execute(args, &ctx).await,
        Commands::Check(args) => commands::check::execute(args, &ctx).await,
    }
}
