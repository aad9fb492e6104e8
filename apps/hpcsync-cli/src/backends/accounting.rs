//! Accounting tool backend.
//!
//! Associations are read with
//! `<tool> -P -n list associations cluster=<c> format=Cluster,Account,User`,
//! which prints one `cluster|grouping|member` line per association; grouping
//! rows have an empty member column.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use hpcsync_connector::command::AccountingCommand;
use hpcsync_connector::error::{ConnectorError, ConnectorResult};
use hpcsync_connector::traits::{AccountingBackend, Association, Revoker};

use crate::process::CommandRunner;

/// Parse the parsable (`-P -n`) association listing.
pub fn parse_associations(
    output: &str,
    reserved: &HashSet<String>,
) -> ConnectorResult<Vec<Association>> {
    let mut associations = Vec::new();
    for (number, line) in output.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() < 3 {
            return Err(ConnectorError::invalid_data(format!(
                "association line {}: expected cluster|account|user, got '{}'",
                number + 1,
                line
            )));
        }
        let (cluster, grouping, member) = (fields[0], fields[1], fields[2]);
        if reserved.contains(grouping) || reserved.contains(member) {
            continue;
        }
        if member.is_empty() {
            associations.push(Association::grouping(cluster, grouping));
        } else {
            associations.push(Association::member(cluster, grouping, member));
        }
    }
    Ok(associations)
}

/// [`AccountingBackend`] over the accounting command-line tool.
pub struct SacctmgrBackend {
    program: String,
    runner: CommandRunner,
    reserved: HashSet<String>,
}

impl SacctmgrBackend {
    pub fn new(program: impl Into<String>, runner: CommandRunner) -> Self {
        Self {
            program: program.into(),
            runner,
            reserved: HashSet::new(),
        }
    }

    /// Skip associations of these groupings or members.
    #[must_use]
    pub fn with_reserved(mut self, names: &[String]) -> Self {
        self.reserved = names.iter().cloned().collect();
        self
    }
}

#[async_trait]
impl AccountingBackend for SacctmgrBackend {
    #[instrument(skip(self))]
    async fn associations(&self, cluster: &str) -> ConnectorResult<Vec<Association>> {
        let args = vec![
            "-P".to_string(),
            "-n".to_string(),
            "list".to_string(),
            "associations".to_string(),
            format!("cluster={cluster}"),
            "format=Cluster,Account,User".to_string(),
        ];
        let output = self.runner.run(&self.program, &args).await?;
        if !output.success() {
            return Err(ConnectorError::command_failed(
                &self.program,
                format!(
                    "listing associations exited with status {}: {}",
                    output.status,
                    output.stderr.trim()
                ),
            ));
        }
        let associations = parse_associations(&output.stdout, &self.reserved)?;
        debug!(cluster, count = associations.len(), "Read associations");
        Ok(associations)
    }

    async fn execute(&self, command: &AccountingCommand) -> ConnectorResult<i32> {
        let output = self.runner.run(&self.program, &command.to_args()).await?;
        if !output.success() {
            warn!(
                command = %command,
                status = output.status,
                stderr = %output.stderr.trim(),
                "Accounting tool rejected command"
            );
        }
        Ok(output.status)
    }
}

/// Revokes a purged member by detaching it from one grouping on every
/// cluster.
pub struct AccountingRevoker {
    backend: Arc<dyn AccountingBackend>,
    grouping: String,
    clusters: Vec<String>,
}

impl AccountingRevoker {
    pub fn new(
        backend: Arc<dyn AccountingBackend>,
        grouping: impl Into<String>,
        clusters: Vec<String>,
    ) -> Self {
        Self {
            backend,
            grouping: grouping.into(),
            clusters,
        }
    }
}

#[async_trait]
impl Revoker for AccountingRevoker {
    async fn revoke(&self, identifier: &str) -> ConnectorResult<()> {
        if self.clusters.is_empty() {
            return Err(ConnectorError::InvalidConfiguration {
                message: "no clusters to revoke on".to_string(),
            });
        }
        for cluster in &self.clusters {
            let command = AccountingCommand::remove_member_from(identifier, &self.grouping, cluster);
            let status = self.backend.execute(&command).await?;
            if status != 0 {
                return Err(ConnectorError::operation_failed(format!(
                    "'{command}' exited with status {status}"
                )));
            }
            info!(identifier, grouping = %self.grouping, cluster = %cluster, "Revoked membership");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserved() -> HashSet<String> {
        ["root".to_string()].into_iter().collect()
    }

    #[test]
    fn test_parse_associations() {
        let output = "doduo|root|\ndoduo|root|root\ndoduo|gvo00002|\ndoduo|gvo00002|vsc40001\n\n";
        let associations = parse_associations(output, &reserved()).unwrap();
        assert_eq!(
            associations,
            vec![
                Association::grouping("doduo", "gvo00002"),
                Association::member("doduo", "gvo00002", "vsc40001"),
            ]
        );
    }

    #[test]
    fn test_parse_rejects_short_lines() {
        let err = parse_associations("doduo|gvo00002\n", &HashSet::new()).unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidData { .. }));
    }
}
