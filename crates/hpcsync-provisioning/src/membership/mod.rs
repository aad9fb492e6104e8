//! Accounting memberships.
//!
//! The diff engine turns current and desired memberships into the minimal
//! command list; the executor runs it fail-fast.

pub mod accounting;
pub mod diff;
pub mod executor;

pub use accounting::{AccountingSync, AccountingSyncConfig};
pub use diff::{diff_cluster, missing_groupings, DesiredMembership};
pub use executor::{BatchExecutor, BatchSummary};
