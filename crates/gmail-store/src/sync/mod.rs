//! Sync orchestration against an external Gmail sync library
//!
//! The network side (listing IDs, fetching messages, resolving users) is
//! reached through the [`GmailSync`] and [`Directory`] traits; this module decides what to
//! sync and persists the results.

mod runner;
mod source;
mod status;

pub use runner::{SkipReason, SyncMode, SyncOutcome, SyncRunner, SyncStats, determine_sync_mode};
pub use source::{ClientStatus, Directory, GmailSync, ListedIds};
pub use status::{is_setup_for_any_domain, is_setup_for_domain};
