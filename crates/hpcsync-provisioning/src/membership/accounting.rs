//! Accounting synchronization.
//!
//! Unlike the directory and storage targets this is a full-state sync: every
//! run compares all VOs and accounts against what each cluster currently
//! records, so there is no checkpoint.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument};

use hpcsync_connector::command::AccountingCommand;
use hpcsync_connector::entity::{Entity, EntityKind};
use hpcsync_connector::traits::{AccountingBackend, SourceOfRecord};

use super::diff::{diff_cluster, missing_groupings, DesiredMembership};
use super::executor::BatchExecutor;
use crate::error::{SyncError, SyncResult};
use crate::sync::directory::MEMBERS_ATTRIBUTE;
use crate::sync::report::RunReport;

/// Accounting sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingSyncConfig {
    /// Clusters to reconcile.
    #[serde(default)]
    pub clusters: Vec<String>,
    /// Parent grouping for newly created groupings.
    #[serde(default = "default_parent")]
    pub parent: String,
    /// VO attribute holding the organization.
    #[serde(default = "default_organization_attribute")]
    pub organization_attribute: String,
    /// Organization used when a VO has none.
    #[serde(default = "default_organization")]
    pub default_organization: String,
    /// Account attribute holding the account status.
    #[serde(default = "default_status_attribute")]
    pub status_attribute: String,
    /// Status values that make an account active.
    #[serde(default = "default_active_statuses")]
    pub active_statuses: Vec<String>,
}

fn default_parent() -> String {
    "root".to_string()
}

fn default_organization_attribute() -> String {
    "institute".to_string()
}

fn default_organization() -> String {
    "default".to_string()
}

fn default_status_attribute() -> String {
    "status".to_string()
}

fn default_active_statuses() -> Vec<String> {
    vec!["active".to_string()]
}

impl Default for AccountingSyncConfig {
    fn default() -> Self {
        Self {
            clusters: Vec::new(),
            parent: default_parent(),
            organization_attribute: default_organization_attribute(),
            default_organization: default_organization(),
            status_attribute: default_status_attribute(),
            active_statuses: default_active_statuses(),
        }
    }
}

impl AccountingSyncConfig {
    /// Check the settings before a run.
    pub fn validate(&self) -> SyncResult<()> {
        if self.clusters.is_empty() {
            return Err(SyncError::configuration("accounting sync needs at least one cluster"));
        }
        if self.active_statuses.is_empty() {
            return Err(SyncError::configuration("no active account statuses configured"));
        }
        Ok(())
    }

    /// Restrict the run to the named clusters.
    #[must_use]
    pub fn with_clusters(mut self, clusters: &[String]) -> Self {
        if !clusters.is_empty() {
            self.clusters.retain(|c| clusters.contains(c));
        }
        self
    }
}

/// Reconciles VO memberships into the accounting database.
pub struct AccountingSync {
    source: Arc<dyn SourceOfRecord>,
    backend: Arc<dyn AccountingBackend>,
    config: AccountingSyncConfig,
    dry_run: bool,
}

impl AccountingSync {
    /// Create an accounting sync.
    pub fn new(
        source: Arc<dyn SourceOfRecord>,
        backend: Arc<dyn AccountingBackend>,
        config: AccountingSyncConfig,
    ) -> Self {
        Self {
            source,
            backend,
            config,
            dry_run: false,
        }
    }

    /// Enable dry-run mode.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn is_active(&self, account: &Entity) -> bool {
        account
            .attributes
            .get_string(&self.config.status_attribute)
            .is_some_and(|s| self.config.active_statuses.iter().any(|a| a == s))
    }

    fn organization<'a>(&'a self, vo: &'a Entity) -> &'a str {
        vo.attributes
            .get_string(&self.config.organization_attribute)
            .unwrap_or(&self.config.default_organization)
    }

    /// Build the full command list across every configured cluster.
    #[instrument(skip(self))]
    pub async fn plan(&self) -> SyncResult<Vec<AccountingCommand>> {
        self.config.validate()?;

        let vos = self.source.list_all(EntityKind::Vo).await?;
        let accounts = self.source.list_all(EntityKind::Account).await?;

        let desired: DesiredMembership = vos
            .iter()
            .filter(|vo| !vo.deleted)
            .map(|vo| {
                let members: BTreeSet<String> = vo
                    .attributes
                    .get_strings(MEMBERS_ATTRIBUTE)
                    .into_iter()
                    .map(String::from)
                    .collect();
                (vo.key.clone(), members)
            })
            .collect();
        let active: BTreeSet<String> = accounts
            .iter()
            .filter(|a| !a.deleted && self.is_active(a))
            .map(|a| a.key.clone())
            .collect();
        info!(
            groupings = desired.len(),
            accounts = accounts.len(),
            active = active.len(),
            "Loaded desired memberships"
        );

        let mut commands = Vec::new();
        for cluster in &self.config.clusters {
            let current = self.backend.associations(cluster).await?;

            let before = commands.len();
            for grouping in missing_groupings(cluster, &current, &desired) {
                let organization = vos
                    .iter()
                    .find(|vo| vo.key == grouping)
                    .map_or(self.config.default_organization.as_str(), |vo| {
                        self.organization(vo)
                    });
                commands.push(AccountingCommand::add_grouping(
                    grouping,
                    &self.config.parent,
                    organization,
                    cluster,
                ));
            }
            commands.extend(diff_cluster(cluster, &current, &desired, &active));
            info!(
                cluster = %cluster,
                associations = current.len(),
                commands = commands.len() - before,
                "Planned cluster changes"
            );
        }

        Ok(commands)
    }

    /// Plan and execute. A failed command aborts the run.
    pub async fn run(&self) -> SyncResult<RunReport> {
        let commands = self.plan().await?;
        self.execute_plan(&commands).await
    }

    /// Execute a previously computed plan.
    pub async fn execute_plan(&self, commands: &[AccountingCommand]) -> SyncResult<RunReport> {
        let mut report = RunReport::start("accounting", self.dry_run);
        let executor = BatchExecutor::new(Arc::clone(&self.backend)).with_dry_run(self.dry_run);
        report.commands = Some(executor.execute(commands).await?);
        report.finish();
        Ok(report)
    }
}
