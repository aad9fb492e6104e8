//! # REST Source-of-Record Client
//!
//! Read-only JSON client for the source-of-record service.
//!
//! ## Features
//!
//! - Bearer token authentication
//! - Next-link or page-number pagination, always drained before returning
//! - `modified_since` change queries in RFC 3339
//! - Retry with exponential backoff for transient statuses
//!
//! ## Example
//!
//! ```ignore
//! use hpcsync_connector_rest::{RestSourceConfig, RestSourceOfRecord};
//! use hpcsync_connector::prelude::*;
//!
//! let config = RestSourceConfig::new("https://account.example.org/api")
//!     .with_token("my-api-token");
//!
//! let source = RestSourceOfRecord::new(config)?;
//! let changed = source.list_modified(EntityKind::Account, since).await?;
//! ```

pub mod client;
pub mod config;

// Re-exports
pub use client::RestSourceOfRecord;
pub use config::{EndpointConfig, PaginationStyle, ResponseConfig, RestSourceConfig, RetryConfig};
