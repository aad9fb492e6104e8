//! # LDAP Directory Target
//!
//! [`DirectoryTarget`](hpcsync_connector::traits::DirectoryTarget) over
//! LDAP for hpcsync's directory sync.
//!
//! ## Features
//!
//! - One entry per account, group and VO under configurable containers
//! - Full-replace modify: attributes missing from the payload are deleted
//! - LDAPS or STARTTLS via rustls
//!
//! ## Example
//!
//! ```ignore
//! use hpcsync_connector_ldap::{LdapConfig, LdapDirectory};
//!
//! let config = LdapConfig::new("ldap.example.org", "dc=hpc,dc=example,dc=org", "cn=sync")
//!     .with_password("secret")
//!     .with_ssl();
//!
//! let directory = LdapDirectory::new(config)?;
//! ```

pub mod config;
pub mod connector;

// Re-exports
pub use config::{ContainerConfig, LdapConfig, ObjectClassConfig};
pub use connector::{compute_changes, AttributeChange, LdapDirectory};
