//! Configuration file handling
//!
//! The configuration is a single YAML file. Secrets may instead come from
//! the environment, which always wins over the file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use hpcsync_connector_ldap::LdapConfig;
use hpcsync_connector_rest::RestSourceConfig;
use hpcsync_provisioning::membership::AccountingSyncConfig;
use hpcsync_provisioning::purge::PurgePolicy;
use hpcsync_provisioning::sync::FilesystemLayout;

use crate::error::{CliError, CliResult};
use crate::process::ExecutionContext;

/// Config file used when neither `--config` nor `HPCSYNC_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hpcsync/hpcsync.yaml";

pub const ENV_CONFIG: &str = "HPCSYNC_CONFIG";
pub const ENV_SOURCE_URL: &str = "HPCSYNC_SOURCE_URL";
pub const ENV_SOURCE_TOKEN: &str = "HPCSYNC_SOURCE_TOKEN";
pub const ENV_LDAP_PASSWORD: &str = "HPCSYNC_LDAP_PASSWORD";
pub const ENV_STATE_DIR: &str = "HPCSYNC_STATE_DIR";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: RestSourceConfig,

    /// Required by `hpcsync directory` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ldap: Option<LdapConfig>,

    /// Checkpoints, purge caches and run locks.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Window start used when a target has no checkpoint yet.
    #[serde(default = "default_start")]
    pub default_start: DateTime<Utc>,

    #[serde(default)]
    pub directory: DirectorySection,

    #[serde(default)]
    pub accounting: AccountingSection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub purge: PurgeSection,

    #[serde(default)]
    pub mail: MailSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/hpcsync")
}

fn default_start() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

fn default_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySection {
    /// Source attributes never written to the directory.
    #[serde(default)]
    pub skip_attributes: Vec<String>,
}

/// Accounting tool settings plus the membership sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingSection {
    #[serde(default = "default_accounting_command")]
    pub command: String,

    /// Run the tool as this user through `runuser`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Groupings and members owned by the accounting tool itself; never
    /// read back as current state.
    #[serde(default = "default_reserved")]
    pub reserved: Vec<String>,

    #[serde(flatten)]
    pub sync: AccountingSyncConfig,
}

fn default_accounting_command() -> String {
    "sacctmgr".to_string()
}

fn default_reserved() -> Vec<String> {
    vec!["root".to_string()]
}

impl Default for AccountingSection {
    fn default() -> Self {
        Self {
            command: default_accounting_command(),
            run_as: None,
            timeout_secs: default_timeout_secs(),
            reserved: default_reserved(),
            sync: AccountingSyncConfig::default(),
        }
    }
}

impl AccountingSection {
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::from_run_as(self.run_as.as_deref())
    }
}

/// Clustered filesystem settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub commands: FilesystemCommands,

    #[serde(default)]
    pub filesystems: Vec<FilesystemLayout>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            run_as: None,
            timeout_secs: default_timeout_secs(),
            commands: FilesystemCommands::default(),
            filesystems: Vec::new(),
        }
    }
}

impl StorageSection {
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::from_run_as(self.run_as.as_deref())
    }
}

/// Programs behind the filesystem primitives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemCommands {
    #[serde(default = "default_list_fileset")]
    pub list_fileset: String,
    #[serde(default = "default_create_fileset")]
    pub create_fileset: String,
    #[serde(default = "default_link_fileset")]
    pub link_fileset: String,
    #[serde(default = "default_set_quota")]
    pub set_quota: String,
    #[serde(default = "default_mkdir")]
    pub mkdir: String,
    #[serde(default = "default_chown")]
    pub chown: String,
    #[serde(default = "default_chmod")]
    pub chmod: String,
}

fn default_list_fileset() -> String {
    "mmlsfileset".to_string()
}

fn default_create_fileset() -> String {
    "mmcrfileset".to_string()
}

fn default_link_fileset() -> String {
    "mmlinkfileset".to_string()
}

fn default_set_quota() -> String {
    "mmsetquota".to_string()
}

fn default_mkdir() -> String {
    "mkdir".to_string()
}

fn default_chown() -> String {
    "chown".to_string()
}

fn default_chmod() -> String {
    "chmod".to_string()
}

impl Default for FilesystemCommands {
    fn default() -> Self {
        Self {
            list_fileset: default_list_fileset(),
            create_fileset: default_create_fileset(),
            link_fileset: default_link_fileset(),
            set_quota: default_set_quota(),
            mkdir: default_mkdir(),
            chown: default_chown(),
            chmod: default_chmod(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurgeSection {
    /// Clusters revocations apply to; falls back to `accounting.clusters`.
    #[serde(default)]
    pub clusters: Vec<String>,

    #[serde(default)]
    pub policies: Vec<PurgePolicyConfig>,
}

impl PurgeSection {
    pub fn policy(&self, name: &str) -> Option<&PurgePolicyConfig> {
        self.policies.iter().find(|p| p.policy.name == name)
    }
}

/// A purge policy and how its revocations and recipients are resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgePolicyConfig {
    #[serde(flatten)]
    pub policy: PurgePolicy,

    /// Accounting grouping the member is removed from; defaults to the
    /// policy's group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoke_grouping: Option<String>,

    /// Account attribute holding the notification address.
    #[serde(default = "default_recipient_attribute")]
    pub recipient_attribute: String,
}

fn default_recipient_attribute() -> String {
    "email".to_string()
}

impl PurgePolicyConfig {
    pub fn revoke_grouping(&self) -> &str {
        self.revoke_grouping
            .as_deref()
            .unwrap_or(&self.policy.group)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailSection {
    #[serde(default = "default_sendmail")]
    pub sendmail: String,
    #[serde(default = "default_sender")]
    pub sender: String,
}

fn default_sendmail() -> String {
    "/usr/sbin/sendmail".to_string()
}

fn default_sender() -> String {
    "hpcsync@localhost".to_string()
}

impl Default for MailSection {
    fn default() -> Self {
        Self {
            sendmail: default_sendmail(),
            sender: default_sender(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Filter directive, e.g. "info,hpcsync_provisioning=debug".
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Resolve the config path: explicit flag, then `HPCSYNC_CONFIG`, then
    /// the system default.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        std::env::var(ENV_CONFIG)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load, apply environment overrides and validate.
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse without overrides or validation.
    pub fn from_yaml(content: &str) -> CliResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply overrides looked up by environment variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_SOURCE_URL) {
            self.source.base_url = url;
        }
        if let Some(token) = lookup(ENV_SOURCE_TOKEN) {
            self.source.token = Some(token);
        }
        if let Some(password) = lookup(ENV_LDAP_PASSWORD) {
            if let Some(ldap) = self.ldap.as_mut() {
                ldap.bind_password = Some(password);
            }
        }
        if let Some(dir) = lookup(ENV_STATE_DIR) {
            self.state_dir = PathBuf::from(dir);
        }
    }

    /// Check everything that can be checked without contacting a system.
    pub fn validate(&self) -> CliResult<()> {
        self.source
            .validate()
            .map_err(|e| CliError::Config(e.to_string()))?;

        if let Some(ldap) = &self.ldap {
            if ldap.host.is_empty() || ldap.base_dn.is_empty() {
                return Err(CliError::Config(
                    "ldap host and base_dn are required".to_string(),
                ));
            }
        }

        let mut names = HashSet::new();
        for layout in &self.storage.filesystems {
            if !names.insert(layout.name.as_str()) {
                return Err(CliError::Config(format!(
                    "duplicate storage name '{}'",
                    layout.name
                )));
            }
        }

        let mut names = HashSet::new();
        for entry in &self.purge.policies {
            let policy = &entry.policy;
            if policy.name.is_empty() || policy.group.is_empty() {
                return Err(CliError::Config(
                    "purge policies need a name and a group".to_string(),
                ));
            }
            if !names.insert(policy.name.as_str()) {
                return Err(CliError::Config(format!(
                    "duplicate purge policy '{}'",
                    policy.name
                )));
            }
            policy.thresholds.validate().map_err(|e| {
                CliError::Config(format!("purge policy '{}': {}", policy.name, e))
            })?;
        }

        Ok(())
    }

    /// Clusters a purge revocation applies to.
    pub fn purge_clusters(&self) -> &[String] {
        if self.purge.clusters.is_empty() {
            &self.accounting.sync.clusters
        } else {
            &self.purge.clusters
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpcsync_connector::entity::EntityKind;

    const MINIMAL: &str = r#"
source:
  base_url: https://account.example.org/api
"#;

    const FULL: &str = r#"
source:
  base_url: https://account.example.org/api
  token: file-token
ldap:
  host: ldap.example.org
  base_dn: dc=hpc,dc=example,dc=org
  bind_dn: cn=sync,dc=hpc,dc=example,dc=org
state_dir: /tmp/hpcsync
default_start: 2014-04-01T00:00:00Z
accounting:
  command: /usr/bin/sacctmgr
  run_as: slurm
  clusters: [doduo, joltik]
  parent: gent
storage:
  filesystems:
    - name: data
      filesystem: gpfsdata
      user_path: /user/data/{key}
      vo_path: /data/gent/{key}
purge:
  policies:
    - name: gvo00002
      group: gvo00002
      thresholds:
        second_notice_after_secs: 100
        final_notice_after_secs: 200
        deadline_secs: 300
      revoke_grouping: gvo00002-cpu
logging:
  level: debug
  format: pretty
"#;

    #[test]
    fn test_minimal_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/hpcsync"));
        assert_eq!(config.default_start, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(config.accounting.command, "sacctmgr");
        assert_eq!(config.accounting.sync.parent, "root");
        assert_eq!(config.mail.sendmail, "/usr/sbin/sendmail");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.ldap.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_yaml(FULL).unwrap();
        assert_eq!(config.accounting.sync.clusters, vec!["doduo", "joltik"]);
        assert_eq!(config.accounting.sync.parent, "gent");
        assert_eq!(
            config.accounting.context(),
            ExecutionContext::AsUser("slurm".to_string())
        );
        assert_eq!(config.storage.filesystems[0].directory_mode, 0o700);
        assert_eq!(config.storage.commands.set_quota, "mmsetquota");

        let policy = config.purge.policy("gvo00002").unwrap();
        assert_eq!(policy.policy.group_kind, EntityKind::Vo);
        assert_eq!(policy.policy.thresholds.deadline_secs, 300);
        assert_eq!(policy.revoke_grouping(), "gvo00002-cpu");
        assert_eq!(policy.recipient_attribute, "email");

        assert_eq!(config.purge_clusters(), ["doduo", "joltik"]);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::from_yaml(FULL).unwrap();
        config.apply_overrides(|name| match name {
            ENV_SOURCE_TOKEN => Some("env-token".to_string()),
            ENV_LDAP_PASSWORD => Some("secret".to_string()),
            ENV_STATE_DIR => Some("/srv/state".to_string()),
            _ => None,
        });

        assert_eq!(config.source.token.as_deref(), Some("env-token"));
        assert_eq!(
            config.ldap.as_ref().unwrap().bind_password.as_deref(),
            Some("secret")
        );
        assert_eq!(config.state_dir, PathBuf::from("/srv/state"));
        assert_eq!(config.source.base_url, "https://account.example.org/api");
    }

    #[test]
    fn test_rejects_thresholds_out_of_order() {
        let yaml = r#"
source:
  base_url: https://account.example.org/api
purge:
  policies:
    - name: p
      group: g
      thresholds:
        second_notice_after_secs: 300
        final_notice_after_secs: 200
        deadline_secs: 100
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("purge policy 'p'"));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_rejects_duplicate_policy() {
        let yaml = r#"
source:
  base_url: https://account.example.org/api
purge:
  policies:
    - name: p
      group: g1
    - name: p
      group: g2
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_missing_base_url() {
        let mut config = Config::from_yaml(MINIMAL).unwrap();
        config.apply_overrides(|name| (name == ENV_SOURCE_URL).then(String::new));
        assert!(matches!(config.validate(), Err(CliError::Config(_))));
    }

    #[test]
    fn test_resolve_path_prefers_flag() {
        let path = Config::resolve_path(Some(Path::new("/tmp/explicit.yaml")));
        assert_eq!(path, PathBuf::from("/tmp/explicit.yaml"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/hpcsync.yaml")).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }
}
