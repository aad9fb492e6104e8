//! Windowed synchronization.
//!
//! Each target system keeps its own checkpoint. A run reconciles the
//! entities modified inside `[checkpoint, now)` and moves the checkpoint to
//! `now` only if nothing failed, so an interrupted or partially failed run
//! is simply repeated by the next one.
//!
//! - [`ChangeSetFetcher`] pulls the changed entities from the source
//! - [`UpsertReconciler`] creates or fully replaces one directory record
//! - [`DirectorySync`] folds dependent entities into their parents
//! - [`StorageSync`] ensures directories, filesets and quotas
//! - [`SyncRunner`] ties a target to its checkpoint

pub mod directory;
pub mod fetcher;
pub mod outcome;
pub mod report;
pub mod runner;
pub mod storage;
pub mod upsert;
pub mod window;

pub use directory::DirectorySync;
pub use fetcher::{ChangeSet, ChangeSetFetcher};
pub use outcome::{OutcomeCounts, OutcomeReport, SyncOutcome};
pub use report::RunReport;
pub use runner::{SyncRunner, WindowedSync};
pub use storage::{FilesystemLayout, QuotaSpec, StorageSync};
pub use upsert::UpsertReconciler;
pub use window::ChangeWindow;
