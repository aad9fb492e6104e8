//! LDAP directory implementation
//!
//! Implements [`DirectoryTarget`] over ldap3. Modify is a full replace: the
//! current entry is read first and every attribute missing from the desired
//! set is deleted.

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use hpcsync_connector::entity::EntityKind;
use hpcsync_connector::error::{ConnectorError, ConnectorResult};
use hpcsync_connector::operation::{AttributeSet, AttributeValue};
use hpcsync_connector::traits::DirectoryTarget;

use crate::config::LdapConfig;

/// LDAP result code: no such object.
const RC_NO_SUCH_OBJECT: u32 = 32;
/// LDAP result code: invalid credentials.
const RC_INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code: entry already exists.
const RC_ALREADY_EXISTS: u32 = 68;

/// Attributes never touched by a modify.
const PROTECTED_ATTRIBUTES: &[&str] = &["dn", "objectClass"];

/// One change to an existing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeChange {
    /// Set the attribute to exactly these values.
    Replace(String, Vec<String>),
    /// Remove the attribute entirely.
    Delete(String),
}

/// Compute the changes that turn `current` into `desired`.
///
/// Attributes are visited in name order. `objectClass`, `dn` and the naming
/// attribute are left alone; everything else absent from `desired` (or
/// present with no values) is deleted if the entry has it.
pub fn compute_changes(
    current: &AttributeSet,
    desired: &AttributeSet,
    key_attribute: &str,
) -> Vec<AttributeChange> {
    let protected = |name: &str| {
        PROTECTED_ATTRIBUTES
            .iter()
            .any(|p| p.eq_ignore_ascii_case(name))
            || name.eq_ignore_ascii_case(key_attribute)
    };

    let mut changes = Vec::new();

    for (name, value) in desired.iter() {
        if protected(name) {
            continue;
        }
        let values = value.to_text_values();
        if values.is_empty() {
            if current.has(name) {
                changes.push(AttributeChange::Delete(name.clone()));
            }
        } else {
            changes.push(AttributeChange::Replace(name.clone(), values));
        }
    }

    for name in current.names() {
        if protected(name) || desired.has(name) {
            continue;
        }
        changes.push(AttributeChange::Delete(name.to_string()));
    }

    changes
}

/// Escape special characters in DN attribute values per RFC 4514.
fn escape_dn_value(value: &str) -> String {
    let count = value.chars().count();
    let mut result = String::with_capacity(value.len() * 2);

    for (i, ch) in value.chars().enumerate() {
        let is_first = i == 0;
        let is_last = i + 1 == count;

        match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                result.push('\\');
                result.push(ch);
            }
            '\0' => result.push_str("\\00"),
            ' ' if is_first || is_last => result.push_str("\\20"),
            '#' if is_first => result.push_str("\\23"),
            _ => result.push(ch),
        }
    }

    result
}

/// Convert an LDAP search entry to an `AttributeSet`.
fn entry_to_attribute_set(entry: SearchEntry) -> AttributeSet {
    let mut attrs = AttributeSet::new();
    for (name, values) in entry.attrs {
        if values.len() == 1 {
            if let Some(value) = values.into_iter().next() {
                attrs.set(name, value);
            }
        } else if !values.is_empty() {
            attrs.set(
                name,
                AttributeValue::Array(values.into_iter().map(AttributeValue::String).collect()),
            );
        }
    }
    attrs
}

/// LDAP directory target.
pub struct LdapDirectory {
    config: LdapConfig,

    /// Cached LDAP connection (lazily initialized).
    connection: Arc<RwLock<Option<Ldap>>>,
}

impl LdapDirectory {
    /// Create a new directory target with the given configuration.
    pub fn new(config: LdapConfig) -> ConnectorResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connection: Arc::new(RwLock::new(None)),
        })
    }

    /// DN of the entry for `(kind, key)`.
    pub fn dn_for(&self, kind: EntityKind, key: &str) -> ConnectorResult<String> {
        let container = self.config.container_dn(kind)?;
        Ok(format!(
            "{}={},{}",
            self.config.key_attribute,
            escape_dn_value(key),
            container
        ))
    }

    /// Get an LDAP connection, creating one if necessary.
    async fn get_connection(&self) -> ConnectorResult<Ldap> {
        {
            let conn_guard = self.connection.read().await;
            if let Some(ref conn) = *conn_guard {
                return Ok(conn.clone());
            }
        }

        let conn = self.create_connection().await?;

        {
            let mut conn_guard = self.connection.write().await;
            *conn_guard = Some(conn.clone());
        }

        Ok(conn)
    }

    async fn create_connection(&self) -> ConnectorResult<Ldap> {
        let url = self.config.url();
        debug!(url = %url, "Connecting to LDAP server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(std::time::Duration::from_secs(
                self.config.connection_timeout_secs,
            ))
            .set_starttls(self.config.use_starttls);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| {
                ConnectorError::connection_failed_with_source(
                    format!("Failed to connect to LDAP server at {url}"),
                    e,
                )
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        let bind_dn = &self.config.bind_dn;
        let bind_password = self.config.bind_password.as_deref().unwrap_or("");

        debug!(bind_dn = %bind_dn, "Performing LDAP bind");

        let result = ldap
            .simple_bind(bind_dn, bind_password)
            .await
            .map_err(|e| {
                ConnectorError::connection_failed_with_source(
                    format!("LDAP bind failed for {bind_dn}"),
                    e,
                )
            })?;

        if result.rc == RC_INVALID_CREDENTIALS {
            return Err(ConnectorError::AuthenticationFailed);
        }
        if result.rc != 0 {
            return Err(ConnectorError::connection_failed(format!(
                "LDAP bind failed with code {}: {}",
                result.rc, result.text
            )));
        }

        info!(host = %self.config.host, "LDAP connection established");
        Ok(ldap)
    }

    /// Read an entry by DN; `None` when it does not exist.
    async fn read_entry(&self, dn: &str) -> ConnectorResult<Option<AttributeSet>> {
        let mut ldap = self.get_connection().await?;

        let ldap3::SearchResult(entries, result) = ldap
            .search(dn, Scope::Base, "(objectClass=*)", vec!["*"])
            .await
            .map_err(|e| ConnectorError::operation_failed_with_source("LDAP search failed", e))?;

        if result.rc == RC_NO_SUCH_OBJECT {
            return Ok(None);
        }
        if result.rc != 0 {
            return Err(ConnectorError::operation_failed(format!(
                "LDAP search for {dn} failed with code {}: {}",
                result.rc, result.text
            )));
        }

        Ok(entries
            .into_iter()
            .next()
            .map(SearchEntry::construct)
            .map(entry_to_attribute_set))
    }
}

#[async_trait]
impl DirectoryTarget for LdapDirectory {
    #[instrument(skip(self))]
    async fn lookup(&self, kind: EntityKind, key: &str) -> ConnectorResult<Option<AttributeSet>> {
        let dn = self.dn_for(kind, key)?;
        self.read_entry(&dn).await
    }

    #[instrument(skip(self, attributes))]
    async fn create(
        &self,
        kind: EntityKind,
        key: &str,
        attributes: &AttributeSet,
    ) -> ConnectorResult<()> {
        let dn = self.dn_for(kind, key)?;
        let mut ldap = self.get_connection().await?;

        debug!(dn = %dn, kind = %kind, "Creating LDAP entry");

        let mut ldap_attrs: Vec<(String, HashSet<String>)> = Vec::new();
        ldap_attrs.push((
            "objectClass".to_string(),
            self.config.object_classes_for(kind).iter().cloned().collect(),
        ));
        ldap_attrs.push((
            self.config.key_attribute.clone(),
            HashSet::from([key.to_string()]),
        ));

        for (name, value) in attributes.iter() {
            if PROTECTED_ATTRIBUTES.contains(&name.as_str())
                || name.eq_ignore_ascii_case(&self.config.key_attribute)
            {
                continue;
            }
            let values = value.to_text_values();
            if !values.is_empty() {
                ldap_attrs.push((name.clone(), values.into_iter().collect()));
            }
        }

        let ldap_attrs_vec: Vec<(&str, HashSet<&str>)> = ldap_attrs
            .iter()
            .map(|(k, v)| (k.as_str(), v.iter().map(String::as_str).collect()))
            .collect();

        let result = ldap.add(&dn, ldap_attrs_vec).await.map_err(|e| {
            ConnectorError::operation_failed_with_source(format!("Failed to create entry: {dn}"), e)
        })?;

        if result.rc == RC_ALREADY_EXISTS {
            return Err(ConnectorError::ObjectAlreadyExists { identifier: dn });
        }
        if result.rc != 0 {
            return Err(ConnectorError::operation_failed(format!(
                "LDAP add failed with code {}: {}",
                result.rc, result.text
            )));
        }

        info!(dn = %dn, "LDAP entry created");
        Ok(())
    }

    #[instrument(skip(self, attributes))]
    async fn modify(
        &self,
        kind: EntityKind,
        key: &str,
        attributes: &AttributeSet,
    ) -> ConnectorResult<()> {
        let dn = self.dn_for(kind, key)?;
        let current = self
            .read_entry(&dn)
            .await?
            .ok_or_else(|| ConnectorError::ObjectNotFound {
                identifier: dn.clone(),
            })?;

        let changes = compute_changes(&current, attributes, &self.config.key_attribute);
        if changes.is_empty() {
            debug!(dn = %dn, "No attributes to write");
            return Ok(());
        }

        let mods: Vec<Mod<String>> = changes
            .into_iter()
            .map(|change| match change {
                AttributeChange::Replace(name, values) => {
                    Mod::Replace(name, values.into_iter().collect())
                }
                AttributeChange::Delete(name) => Mod::Delete(name, HashSet::new()),
            })
            .collect();

        debug!(dn = %dn, mods = mods.len(), "Replacing LDAP entry attributes");

        let mut ldap = self.get_connection().await?;
        let result = ldap.modify(&dn, mods).await.map_err(|e| {
            ConnectorError::operation_failed_with_source(format!("Failed to update entry: {dn}"), e)
        })?;

        if result.rc == RC_NO_SUCH_OBJECT {
            return Err(ConnectorError::ObjectNotFound { identifier: dn });
        }
        if result.rc != 0 {
            return Err(ConnectorError::operation_failed(format!(
                "LDAP modify failed with code {}: {}",
                result.rc, result.text
            )));
        }

        info!(dn = %dn, "LDAP entry updated");
        Ok(())
    }
}

impl std::fmt::Debug for LdapDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapDirectory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
