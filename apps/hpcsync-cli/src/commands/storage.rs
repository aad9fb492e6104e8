//! Storage sync command

use chrono::Utc;
use clap::Args;
use std::sync::Arc;
use tracing::info;

use hpcsync_connector::entity::EntityKind;
use hpcsync_provisioning::sync::{FilesystemLayout, StorageSync};

use super::{checkpoint_name, finish, RunContext};
use crate::backends::CommandFilesystem;
use crate::error::{CliError, CliResult};

/// Arguments for the storage command
#[derive(Args, Debug)]
pub struct StorageArgs {
    /// Sync account directories and user quotas
    #[arg(long)]
    pub user: bool,

    /// Sync VO filesets and quotas
    #[arg(long)]
    pub vo: bool,

    /// Only these storages (repeatable)
    #[arg(long = "storage", value_name = "NAME")]
    pub storages: Vec<String>,
}

impl StorageArgs {
    pub fn kinds(&self) -> Vec<EntityKind> {
        let mut kinds = Vec::new();
        if self.user || !self.vo {
            kinds.extend([EntityKind::Account, EntityKind::UserQuota]);
        }
        if self.vo || !self.user {
            kinds.push(EntityKind::VoQuota);
        }
        kinds
    }

    /// Configured layouts restricted to the requested storages.
    pub fn layouts(&self, configured: &[FilesystemLayout]) -> CliResult<Vec<FilesystemLayout>> {
        if configured.is_empty() {
            return Err(CliError::Config("no storage filesystems configured".to_string()));
        }
        if let Some(unknown) = self
            .storages
            .iter()
            .find(|name| !configured.iter().any(|l| &l.name == *name))
        {
            return Err(CliError::Usage(format!("unknown storage '{unknown}'")));
        }
        Ok(configured
            .iter()
            .filter(|l| self.storages.is_empty() || self.storages.contains(&l.name))
            .cloned()
            .collect())
    }

    pub fn selection(&self) -> Vec<&str> {
        let mut selection = match (self.user, self.vo) {
            (true, false) => vec!["user"],
            (false, true) => vec!["vo"],
            _ => Vec::new(),
        };
        let mut storages: Vec<&str> = self.storages.iter().map(String::as_str).collect();
        storages.sort_unstable();
        storages.dedup();
        selection.extend(storages);
        selection
    }
}

/// Execute the storage command
pub async fn execute(args: StorageArgs, ctx: &RunContext) -> CliResult<()> {
    let section = &ctx.config.storage;
    let layouts = args.layouts(&section.filesystems)?;

    let _lock = ctx.lock("storage")?;
    let source = ctx.source()?;
    let fs = Arc::new(CommandFilesystem::new(
        ctx.command_runner(section.context(), section.timeout_secs),
        section.commands.clone(),
    ));

    let sync = StorageSync::new(fs, layouts).with_kinds(&args.kinds());
    info!(storages = ?sync.storage_names(), dry_run = ctx.dry_run, "Starting storage sync");

    let report = ctx
        .runner(source, &checkpoint_name("storage", &args.selection()))
        .run(&sync, Utc::now())
        .await?;

    ctx.emit(&report)?;
    finish(&[report])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(name: &str) -> FilesystemLayout {
        FilesystemLayout {
            name: name.to_string(),
            filesystem: format!("gpfs{name}"),
            user_path: Some(format!("/user/{name}/{{key}}")),
            vo_path: None,
            directory_mode: 0o700,
        }
    }

    fn args(storages: &[&str]) -> StorageArgs {
        StorageArgs {
            user: false,
            vo: false,
            storages: storages.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_layouts_filter() {
        let configured = vec![layout("home"), layout("data")];
        let selected = args(&["data"]).layouts(&configured).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "data");
        assert_eq!(args(&[]).layouts(&configured).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_storage_is_usage_error() {
        let err = args(&["scratch"]).layouts(&[layout("home")]).unwrap_err();
        assert!(matches!(err, CliError::Usage(_)));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_selection_is_stable() {
        assert_eq!(args(&["data", "home", "data"]).selection(), vec!["data", "home"]);
    }

    #[test]
    fn test_vo_kinds() {
        let args = StorageArgs {
            user: false,
            vo: true,
            storages: Vec::new(),
        };
        assert_eq!(args.kinds(), vec![EntityKind::VoQuota]);
    }
}
