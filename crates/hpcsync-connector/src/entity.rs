//! Source-of-record entities.
//!
//! Entities are immutable snapshots fetched once per run. Nothing in hpcsync
//! mutates an entity in place; every run re-derives the desired downstream
//! state from fresh snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::operation::AttributeSet;

/// Kind of synchronizable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A user account.
    Account,
    /// A plain POSIX group.
    Group,
    /// A virtual organisation: a group that owns shared storage and an
    /// accounting grouping.
    Vo,
    /// A public key belonging to an account.
    Pubkey,
    /// A personal storage quota belonging to an account.
    UserQuota,
    /// A shared storage quota belonging to a VO.
    VoQuota,
}

impl EntityKind {
    /// All kinds, in the order the directory sync processes them.
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Account,
        EntityKind::Pubkey,
        EntityKind::UserQuota,
        EntityKind::Group,
        EntityKind::Vo,
        EntityKind::VoQuota,
    ];

    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Account => "account",
            EntityKind::Group => "group",
            EntityKind::Vo => "vo",
            EntityKind::Pubkey => "pubkey",
            EntityKind::UserQuota => "user_quota",
            EntityKind::VoQuota => "vo_quota",
        }
    }

    /// The kind of the owning entity, for dependent kinds.
    #[must_use]
    pub fn parent_kind(&self) -> Option<EntityKind> {
        match self {
            EntityKind::Pubkey | EntityKind::UserQuota => Some(EntityKind::Account),
            EntityKind::VoQuota => Some(EntityKind::Vo),
            EntityKind::Account | EntityKind::Group | EntityKind::Vo => None,
        }
    }

    /// Whether this kind is folded into its parent's downstream record.
    #[must_use]
    pub fn is_dependent(&self) -> bool {
        self.parent_kind().is_some()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "account" | "user" => Ok(EntityKind::Account),
            "group" => Ok(EntityKind::Group),
            "vo" => Ok(EntityKind::Vo),
            "pubkey" => Ok(EntityKind::Pubkey),
            "user_quota" => Ok(EntityKind::UserQuota),
            "vo_quota" => Ok(EntityKind::VoQuota),
            _ => Err(format!("Unknown entity kind: {s}")),
        }
    }
}

/// An immutable snapshot of one source-of-record record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity kind.
    pub kind: EntityKind,
    /// Stable key, unique within the kind.
    pub key: String,
    /// Key of the owning entity for dependent kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Attributes used to build target-system payloads.
    #[serde(default)]
    pub attributes: AttributeSet,
    /// Last modification instant in the source-of-record.
    pub modified: DateTime<Utc>,
    /// Whether the record was deleted upstream (e.g. a revoked public key).
    #[serde(default)]
    pub deleted: bool,
}

impl Entity {
    /// Create a new top-level entity.
    pub fn new(
        kind: EntityKind,
        key: impl Into<String>,
        attributes: AttributeSet,
        modified: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            key: key.into(),
            parent: None,
            attributes,
            modified,
            deleted: false,
        }
    }

    /// Attach the owning entity's key.
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Mark the entity as deleted upstream.
    #[must_use]
    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_roundtrip() {
        for kind in EntityKind::ALL {
            let parsed: EntityKind = kind.as_str().parse().unwrap();
            assert_eq!(kind, parsed);
        }
        assert_eq!("user".parse::<EntityKind>().unwrap(), EntityKind::Account);
        assert!("fileset".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_parent_kinds() {
        assert_eq!(EntityKind::Pubkey.parent_kind(), Some(EntityKind::Account));
        assert_eq!(EntityKind::UserQuota.parent_kind(), Some(EntityKind::Account));
        assert_eq!(EntityKind::VoQuota.parent_kind(), Some(EntityKind::Vo));
        assert!(!EntityKind::Account.is_dependent());
        assert!(EntityKind::Pubkey.is_dependent());
    }

    #[test]
    fn test_entity_json_shape() {
        let json = serde_json::json!({
            "kind": "pubkey",
            "key": "42",
            "parent": "vsc40001",
            "attributes": {"pubkey": "ssh-ed25519 AAAA"},
            "modified": "2024-03-01T10:00:00Z"
        });
        let entity: Entity = serde_json::from_value(json).unwrap();
        assert_eq!(entity.kind, EntityKind::Pubkey);
        assert_eq!(entity.parent.as_deref(), Some("vsc40001"));
        assert!(!entity.deleted);
        assert_eq!(
            entity.attributes.get_string("pubkey"),
            Some("ssh-ed25519 AAAA")
        );
    }
}
