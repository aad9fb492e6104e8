//! Grace-period purges.
//!
//! State is kept per policy in a small JSON cache: the eligible set seen by
//! the previous run and the warning timestamps of every tracked identifier.

pub mod cache;
pub mod machine;
pub mod state;

pub use cache::{PurgeCache, PurgeCacheFile};
pub use machine::{
    plan_transitions, GracePeriodPurge, Notice, NoticeTemplate, NoticeTemplates, PurgePolicy,
    PurgeSummary, RecipientResolver, SourceRecipientResolver, Transition,
};
pub use state::{PurgeState, PurgeThresholds, PurgeeRecord};
