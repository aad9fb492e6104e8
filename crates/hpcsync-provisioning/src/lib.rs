//! # Reconciliation Engine
//!
//! Keeps a directory, a cluster accounting database and filesystem quotas
//! converged on the state held by a source-of-record.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────┐     ┌────────────────┐
//! │ Source-of-record │────►│ ChangeSet    │────►│ DirectorySync  │──► directory
//! │                  │     │ Fetcher      │     │ StorageSync    │──► filesystems
//! └────────┬─────────┘     └──────▲───────┘     └────────────────┘
//!          │                      │ [checkpoint, now)
//!          │               ┌──────┴───────┐
//!          │               │  Checkpoint  │  advanced only on zero errors
//!          │               └──────────────┘
//!          │
//!          ├──────────────►  AccountingSync ──► diff ──► BatchExecutor ──► accounting
//!          │
//!          └──────────────►  GracePeriodPurge ──► Notifier / Revoker
//! ```
//!
//! ## Features
//!
//! - **Change windows**: half-open `[last, now)`, one checkpoint per target
//! - **Upserts**: create-if-absent, full replace otherwise, dependents folded
//!   into their parent record
//! - **Membership diffs**: minimal add/move/remove command lists, executed
//!   fail-fast
//! - **Grace-period purges**: three warnings, then revocation, persisted in a
//!   per-policy cache
//! - **Dry run**: every sync reports the same decisions without writing

pub mod checkpoint;
pub mod error;
pub mod lock;
pub mod membership;
pub mod purge;
pub mod sync;

pub use checkpoint::{CheckpointStore, FileCheckpointStore};
pub use error::{CheckpointError, SyncError, SyncResult};
pub use lock::RunLock;
pub use membership::{
    diff_cluster, AccountingSync, AccountingSyncConfig, BatchExecutor, BatchSummary,
    DesiredMembership,
};
pub use purge::{
    GracePeriodPurge, PurgeCache, PurgeCacheFile, PurgePolicy, PurgeState, PurgeSummary,
    PurgeThresholds, PurgeeRecord, RecipientResolver, SourceRecipientResolver,
};
pub use sync::{
    ChangeSet, ChangeSetFetcher, ChangeWindow, DirectorySync, FilesystemLayout, OutcomeReport,
    QuotaSpec, RunReport, StorageSync, SyncOutcome, SyncRunner, UpsertReconciler, WindowedSync,
};
