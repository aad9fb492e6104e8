//! # Connector Contracts
//!
//! Core abstractions shared by hpcsync's reconciliation engine and the
//! clients that talk to the source-of-record and to target systems.
//!
//! ## Architecture
//!
//! - [`SourceOfRecord`] - Authoritative entity snapshots, queried by change window
//! - [`DirectoryTarget`] - Lookup plus create/full-replace modify
//! - [`AccountingBackend`] - Cluster accounting associations and commands
//! - [`FilesystemOps`] - Idempotent fileset/quota/directory primitives
//! - [`Notifier`], [`Revoker`] - Side effects of the grace-period purge
//!
//! ## Crate Organization
//!
//! - [`entity`] - `Entity` snapshots and `EntityKind`
//! - [`operation`] - `AttributeSet` payloads
//! - [`command`] - Accounting tool commands
//! - [`error`] - Error types with transient/permanent classification
//! - [`traits`] - Collaborator traits
//!
//! [`SourceOfRecord`]: traits::SourceOfRecord
//! [`DirectoryTarget`]: traits::DirectoryTarget
//! [`AccountingBackend`]: traits::AccountingBackend
//! [`FilesystemOps`]: traits::FilesystemOps
//! [`Notifier`]: traits::Notifier
//! [`Revoker`]: traits::Revoker

pub mod command;
pub mod entity;
pub mod error;
pub mod operation;
pub mod traits;

/// Prelude module for convenient imports.
///
/// ```
/// use hpcsync_connector::prelude::*;
/// ```
pub mod prelude {
    pub use crate::command::{AccountingCommand, CommandField, CommandNoun, CommandVerb};
    pub use crate::entity::{Entity, EntityKind};
    pub use crate::error::{ConnectorError, ConnectorResult};
    pub use crate::operation::{AttributeSet, AttributeValue};
    pub use crate::traits::{
        AccountingBackend, Association, DirectoryTarget, Ensured, FilesystemOps, Notifier,
        QuotaRequest, Revoker, SourceOfRecord,
    };
}

// Re-export async_trait for implementors
pub use async_trait::async_trait;
