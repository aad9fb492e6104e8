//! LDAP directory configuration

use serde::{Deserialize, Serialize};

use hpcsync_connector::entity::EntityKind;
use hpcsync_connector::error::{ConnectorError, ConnectorResult};

/// Configuration for [`LdapDirectory`](crate::LdapDirectory).
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// LDAP server hostname or IP address.
    pub host: String,

    /// LDAP server port (389 for LDAP, 636 for LDAPS).
    #[serde(default = "default_ldap_port")]
    pub port: u16,

    /// Use SSL/TLS (LDAPS).
    #[serde(default)]
    pub use_ssl: bool,

    /// Use STARTTLS upgrade on plain LDAP connection.
    #[serde(default)]
    pub use_starttls: bool,

    /// Base DN for all operations (e.g., "dc=hpc,dc=example,dc=org").
    pub base_dn: String,

    /// Bind DN for authentication.
    pub bind_dn: String,

    /// Bind password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// Connect timeout in seconds.
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// Attribute naming the entry in its DN.
    #[serde(default = "default_key_attribute")]
    pub key_attribute: String,

    /// Container per kind, relative to `base_dn`.
    #[serde(default)]
    pub containers: ContainerConfig,

    /// Object classes written on create, per kind.
    #[serde(default)]
    pub object_classes: ObjectClassConfig,
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("use_starttls", &self.use_starttls)
            .field("base_dn", &self.base_dn)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .field("key_attribute", &self.key_attribute)
            .field("containers", &self.containers)
            .field("object_classes", &self.object_classes)
            .finish()
    }
}

fn default_ldap_port() -> u16 {
    389
}

fn default_connection_timeout_secs() -> u64 {
    30
}

fn default_key_attribute() -> String {
    "cn".to_string()
}

/// Containers holding each top-level kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default = "default_account_container")]
    pub account: String,
    #[serde(default = "default_group_container")]
    pub group: String,
    #[serde(default = "default_vo_container")]
    pub vo: String,
}

fn default_account_container() -> String {
    "ou=people".to_string()
}

fn default_group_container() -> String {
    "ou=groups".to_string()
}

fn default_vo_container() -> String {
    "ou=vos".to_string()
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            account: default_account_container(),
            group: default_group_container(),
            vo: default_vo_container(),
        }
    }
}

/// Object classes per top-level kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectClassConfig {
    #[serde(default = "default_account_object_classes")]
    pub account: Vec<String>,
    #[serde(default = "default_group_object_classes")]
    pub group: Vec<String>,
    #[serde(default = "default_vo_object_classes")]
    pub vo: Vec<String>,
}

fn default_account_object_classes() -> Vec<String> {
    vec![
        "top".to_string(),
        "inetOrgPerson".to_string(),
        "posixAccount".to_string(),
        "ldapPublicKey".to_string(),
    ]
}

fn default_group_object_classes() -> Vec<String> {
    vec!["top".to_string(), "posixGroup".to_string()]
}

fn default_vo_object_classes() -> Vec<String> {
    vec!["top".to_string(), "posixGroup".to_string()]
}

impl Default for ObjectClassConfig {
    fn default() -> Self {
        Self {
            account: default_account_object_classes(),
            group: default_group_object_classes(),
            vo: default_vo_object_classes(),
        }
    }
}

impl LdapConfig {
    /// Create a new LDAP config with required fields.
    pub fn new(
        host: impl Into<String>,
        base_dn: impl Into<String>,
        bind_dn: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_ldap_port(),
            use_ssl: false,
            use_starttls: false,
            base_dn: base_dn.into(),
            bind_dn: bind_dn.into(),
            bind_password: None,
            connection_timeout_secs: default_connection_timeout_secs(),
            key_attribute: default_key_attribute(),
            containers: ContainerConfig::default(),
            object_classes: ObjectClassConfig::default(),
        }
    }

    /// Set bind password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.bind_password = Some(password.into());
        self
    }

    /// Enable SSL (LDAPS).
    #[must_use]
    pub fn with_ssl(mut self) -> Self {
        self.use_ssl = true;
        self.port = 636;
        self
    }

    /// Get the LDAP URL.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Full container DN for a kind. Dependent kinds have no entries of
    /// their own: they are folded into their parent's entry.
    pub fn container_dn(&self, kind: EntityKind) -> ConnectorResult<String> {
        let container = match kind {
            EntityKind::Account => &self.containers.account,
            EntityKind::Group => &self.containers.group,
            EntityKind::Vo => &self.containers.vo,
            EntityKind::Pubkey | EntityKind::UserQuota | EntityKind::VoQuota => {
                return Err(ConnectorError::invalid_data(format!(
                    "{kind} records have no directory entry of their own"
                )))
            }
        };
        if container.is_empty() {
            Ok(self.base_dn.clone())
        } else {
            Ok(format!("{},{}", container, self.base_dn))
        }
    }

    /// Object classes for a top-level kind.
    pub fn object_classes_for(&self, kind: EntityKind) -> &[String] {
        match kind {
            EntityKind::Account => &self.object_classes.account,
            EntityKind::Group => &self.object_classes.group,
            EntityKind::Vo => &self.object_classes.vo,
            EntityKind::Pubkey | EntityKind::UserQuota | EntityKind::VoQuota => &[],
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.host.is_empty() {
            return Err(ConnectorError::InvalidConfiguration {
                message: "ldap host is required".to_string(),
            });
        }
        if self.port == 0 {
            return Err(ConnectorError::InvalidConfiguration {
                message: "ldap port must be positive".to_string(),
            });
        }
        if self.base_dn.is_empty() {
            return Err(ConnectorError::InvalidConfiguration {
                message: "ldap base_dn is required".to_string(),
            });
        }
        if self.key_attribute.is_empty() {
            return Err(ConnectorError::InvalidConfiguration {
                message: "ldap key_attribute is required".to_string(),
            });
        }
        if self.use_ssl && self.use_starttls {
            return Err(ConnectorError::InvalidConfiguration {
                message: "use_ssl and use_starttls are mutually exclusive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LdapConfig {
        LdapConfig::new("ldap.example.org", "dc=hpc,dc=example,dc=org", "cn=sync")
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert_eq!(config.url(), "ldap://ldap.example.org:389");
        assert_eq!(config.with_ssl().url(), "ldaps://ldap.example.org:636");
    }

    #[test]
    fn test_container_dn() {
        let config = config();
        assert_eq!(
            config.container_dn(EntityKind::Vo).unwrap(),
            "ou=vos,dc=hpc,dc=example,dc=org"
        );
        assert!(config.container_dn(EntityKind::Pubkey).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());
        let mut bad = config();
        bad.base_dn.clear();
        assert!(bad.validate().is_err());
        let mut both = config().with_ssl();
        both.use_starttls = true;
        assert!(both.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = config().with_password("hunter2");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: LdapConfig = serde_json::from_str(
            r#"{"host": "h", "base_dn": "dc=x", "bind_dn": "cn=y", "containers": {"account": "ou=users"}}"#,
        )
        .unwrap();
        assert_eq!(config.containers.account, "ou=users");
        assert_eq!(config.containers.group, "ou=groups");
        assert_eq!(config.key_attribute, "cn");
    }
}
