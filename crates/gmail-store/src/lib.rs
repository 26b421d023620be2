//! gmail-store - Persistence core for Gmail sync
//!
//! This crate provides:
//! - Domain models (Message, Label, SyncHistory, PendingGmailIds, SyncSetting)
//! - Storage trait abstractions with in-memory and SQLite backends
//! - Thread queries returning the latest message per conversation
//! - Two-phase cleanup of per-user data when sync settings change
//! - Sync selection on top of an external Gmail sync library
//!
//! Threads are always identified by (thread ID, user ID): Gmail thread IDs
//! are only unique within one mailbox.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod models;
pub mod query;
pub mod storage;
pub mod sync;

pub use cleanup::{CleanupCoordinator, CleanupReport, PendingRemoval};
pub use config::StoreConfig;
pub use error::{CleanupError, QueryError};
pub use models::{
    GmailId, Label, LabelBearing, Message, MessageBuilder, PendingGmailIds, SyncHistory,
    SyncSetting, ThreadId, ThreadKey, ThreadPartial, UserId,
};
pub use query::{MessageFilter, Page, SortDirection, ThreadDeduplicator, parse_sort};
pub use storage::{InMemoryMailStore, MailStore, PurgeStats, SqliteMailStore};
pub use sync::{
    ClientStatus, Directory, GmailSync, ListedIds, SkipReason, SyncMode, SyncOutcome,
    SyncRunner, SyncStats, determine_sync_mode, is_setup_for_any_domain, is_setup_for_domain,
};
