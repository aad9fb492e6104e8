//! Accounting tool commands.
//!
//! A command is a fully-formed instruction for the external accounting tool:
//! a verb, a noun, a target name and ordered `Key=value` fields.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Action performed by an accounting command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandVerb {
    Add,
    Delete,
}

impl CommandVerb {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandVerb::Add => "add",
            CommandVerb::Delete => "delete",
        }
    }
}

/// Object an accounting command acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandNoun {
    /// A grouping (an accounting "account").
    Account,
    /// A member association (an accounting "user").
    User,
}

impl CommandNoun {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandNoun::Account => "account",
            CommandNoun::User => "user",
        }
    }
}

/// Field keys accepted by the accounting tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandField {
    Parent,
    Cluster,
    Account,
    DefaultAccount,
    Organization,
}

impl CommandField {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandField::Parent => "Parent",
            CommandField::Cluster => "Cluster",
            CommandField::Account => "Account",
            CommandField::DefaultAccount => "DefaultAccount",
            CommandField::Organization => "Organization",
        }
    }
}

/// One instruction for the accounting tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingCommand {
    pub verb: CommandVerb,
    pub noun: CommandNoun,
    /// Name of the grouping or member the command targets.
    pub name: String,
    /// Ordered `Key=value` fields.
    pub fields: Vec<(CommandField, String)>,
}

impl AccountingCommand {
    fn new(verb: CommandVerb, noun: CommandNoun, name: impl Into<String>) -> Self {
        Self {
            verb,
            noun,
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Create a grouping on a cluster.
    pub fn add_grouping(
        grouping: impl Into<String>,
        parent: impl Into<String>,
        organization: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        Self::new(CommandVerb::Add, CommandNoun::Account, grouping)
            .field(CommandField::Parent, parent)
            .field(CommandField::Organization, organization)
            .field(CommandField::Cluster, cluster)
    }

    /// Attach a member to a grouping and make it the member's default.
    pub fn add_member(
        member: impl Into<String>,
        grouping: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        let grouping = grouping.into();
        Self::new(CommandVerb::Add, CommandNoun::User, member)
            .field(CommandField::Account, grouping.clone())
            .field(CommandField::DefaultAccount, grouping)
            .field(CommandField::Cluster, cluster)
    }

    /// Detach a member from one grouping only.
    pub fn remove_member_from(
        member: impl Into<String>,
        grouping: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        Self::new(CommandVerb::Delete, CommandNoun::User, member)
            .field(CommandField::Account, grouping)
            .field(CommandField::Cluster, cluster)
    }

    /// Remove a member from the cluster altogether.
    pub fn remove_member(member: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self::new(CommandVerb::Delete, CommandNoun::User, member)
            .field(CommandField::Cluster, cluster)
    }

    /// Append a field.
    #[must_use]
    pub fn field(mut self, key: CommandField, value: impl Into<String>) -> Self {
        self.fields.push((key, value.into()));
        self
    }

    /// Value of the first field with the given key.
    pub fn field_value(&self, key: CommandField) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Arguments for the accounting tool, without the program name.
    ///
    /// `-i` commits immediately instead of prompting for confirmation.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.verb.as_str().to_string(),
            self.noun.as_str().to_string(),
            self.name.clone(),
        ];
        args.extend(
            self.fields
                .iter()
                .map(|(key, value)| format!("{}={}", key.as_str(), value)),
        );
        args
    }
}

impl fmt::Display for AccountingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.verb.as_str(), self.noun.as_str(), self.name)?;
        for (key, value) in &self.fields {
            write!(f, " {}={}", key.as_str(), value)?;
        }
        Ok(())
    }
}
