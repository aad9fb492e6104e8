//! Directory sync command

use chrono::Utc;
use clap::Args;
use std::sync::Arc;
use tracing::info;

use hpcsync_connector::entity::EntityKind;
use hpcsync_connector_ldap::LdapDirectory;
use hpcsync_provisioning::sync::DirectorySync;

use super::{checkpoint_name, finish, RunContext};
use crate::error::{CliError, CliResult};

/// Arguments for the directory command
#[derive(Args, Debug)]
pub struct DirectoryArgs {
    /// Sync accounts, public keys and user quotas
    #[arg(long)]
    pub user: bool,

    /// Sync groups, VOs and VO quotas
    #[arg(long)]
    pub vo: bool,
}

impl DirectoryArgs {
    /// Kinds selected by the flags; neither flag selects everything.
    pub fn kinds(&self) -> Vec<EntityKind> {
        let mut kinds = Vec::new();
        if self.user || !self.vo {
            kinds.extend([EntityKind::Account, EntityKind::Pubkey, EntityKind::UserQuota]);
        }
        if self.vo || !self.user {
            kinds.extend([EntityKind::Group, EntityKind::Vo, EntityKind::VoQuota]);
        }
        kinds
    }

    pub fn selection(&self) -> Vec<&'static str> {
        match (self.user, self.vo) {
            (true, false) => vec!["user"],
            (false, true) => vec!["vo"],
            _ => Vec::new(),
        }
    }
}

/// Execute the directory command
pub async fn execute(args: DirectoryArgs, ctx: &RunContext) -> CliResult<()> {
    let ldap = ctx.config.ldap.clone().ok_or_else(|| {
        CliError::Config("an ldap section is required for directory sync".to_string())
    })?;

    let _lock = ctx.lock("directory")?;
    let source = ctx.source()?;
    let directory = Arc::new(LdapDirectory::new(ldap)?);

    let sync = DirectorySync::new(Arc::clone(&source), directory)
        .with_kinds(&args.kinds())
        .with_skip_attributes(ctx.config.directory.skip_attributes.clone());
    info!(kinds = ?args.kinds(), dry_run = ctx.dry_run, "Starting directory sync");

    let report = ctx
        .runner(source, &checkpoint_name("directory", &args.selection()))
        .run(&sync, Utc::now())
        .await?;

    ctx.emit(&report)?;
    finish(&[report])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(user: bool, vo: bool) -> DirectoryArgs {
        DirectoryArgs { user, vo }
    }

    #[test]
    fn test_kinds_default_is_everything() {
        assert_eq!(args(false, false).kinds().len(), 6);
        assert_eq!(args(true, true).kinds().len(), 6);
        assert!(args(false, false).selection().is_empty());
    }

    #[test]
    fn test_kinds_user_only() {
        assert_eq!(
            args(true, false).kinds(),
            vec![EntityKind::Account, EntityKind::Pubkey, EntityKind::UserQuota]
        );
        assert_eq!(args(true, false).selection(), vec!["user"]);
    }

    #[test]
    fn test_kinds_vo_only() {
        assert_eq!(
            args(false, true).kinds(),
            vec![EntityKind::Group, EntityKind::Vo, EntityKind::VoQuota]
        );
    }
}
