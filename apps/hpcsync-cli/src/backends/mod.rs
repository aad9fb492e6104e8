//! Process-backed adapters for the collaborator traits.

pub mod accounting;
pub mod filesystem;
pub mod mail;

pub use accounting::{parse_associations, AccountingRevoker, SacctmgrBackend};
pub use filesystem::{quota_args, CommandFilesystem};
pub use mail::{render_message, SendmailNotifier};
