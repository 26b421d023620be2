//! Storage trait definitions

use std::collections::BTreeSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::{
    GmailId, Label, Message, PendingGmailIds, SyncHistory, SyncSetting, ThreadPartial, UserId,
};
use crate::query::{MessageFilter, Page, SortDirection};

/// Rows removed by a per-user purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeStats {
    pub messages: usize,
    pub labels: usize,
    pub histories: usize,
    pub pending_ids: usize,
}

impl PurgeStats {
    pub fn total(&self) -> usize {
        self.messages + self.labels + self.histories + self.pending_ids
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl std::ops::AddAssign for PurgeStats {
    fn add_assign(&mut self, other: Self) {
        self.messages += other.messages;
        self.labels += other.labels;
        self.histories += other.histories;
        self.pending_ids += other.pending_ids;
    }
}

/// Trait for Gmail sync storage operations
///
/// This trait abstracts over different storage backends (in-memory, SQLite)
/// and provides the reads, writes and scoped deletes the query, cleanup and
/// sync layers need. Each call is its own transaction.
pub trait MailStore: Send + Sync {
    // === Messages ===

    /// Insert or update a message, keyed by Gmail ID
    ///
    /// Replaces the message's label links and creates any missing labels
    /// for its user. Returns the row identity.
    fn upsert_message(&self, message: Message) -> Result<i64>;

    /// Get a message (with all of its labels) by Gmail ID
    fn get_message(&self, gmail_id: &GmailId) -> Result<Option<Message>>;

    /// Check if a message exists
    fn has_message(&self, gmail_id: &GmailId) -> Result<bool>;

    /// Count all stored messages
    fn count_messages(&self) -> Result<usize>;

    // === Labels ===

    /// Insert a label if it does not exist yet
    fn upsert_label(&self, label: Label) -> Result<()>;

    /// List a user's labels, ordered by name
    fn list_labels(&self, user_id: &UserId) -> Result<Vec<Label>>;

    // === Thread queries ===

    /// Group messages matching `filter` by (thread ID, user ID) and take
    /// the newest `sent_at` of each group
    ///
    /// Groups are ordered by that maximum when `sort` is given, then
    /// windowed by `page`. Without a sort the order is store-defined.
    fn thread_partials(
        &self,
        filter: &MessageFilter,
        sort: Option<SortDirection>,
        page: Page,
    ) -> Result<Vec<ThreadPartial>>;

    /// Load the messages matching `filter` whose (thread ID, user ID,
    /// sent_at) equals one of `partials`, with all of their labels
    fn messages_for_partials(
        &self,
        filter: &MessageFilter,
        partials: &[ThreadPartial],
    ) -> Result<Vec<Message>>;

    /// Count distinct (thread ID, user ID) pairs among matching messages
    fn count_distinct_threads(&self, filter: &MessageFilter) -> Result<usize>;

    // === Sync history ===

    fn get_sync_history(&self, user_id: &UserId) -> Result<Option<SyncHistory>>;

    /// Save sync history (upsert)
    fn save_sync_history(&self, history: SyncHistory) -> Result<()>;

    // === Pending Gmail IDs ===

    fn get_pending_ids(&self, user_id: &UserId) -> Result<Option<PendingGmailIds>>;

    /// Save a user's pending queue (upsert, order preserved)
    fn save_pending_ids(&self, pending: PendingGmailIds) -> Result<()>;

    // === Sync settings ===

    fn get_sync_setting(&self, domain: &str) -> Result<Option<SyncSetting>>;

    /// Any one sync setting, if at least one exists
    fn first_sync_setting(&self) -> Result<Option<SyncSetting>>;

    /// All sync settings, ordered by domain
    fn list_sync_settings(&self) -> Result<Vec<SyncSetting>>;

    /// Save a sync setting (upsert by domain)
    fn save_sync_setting(&self, setting: SyncSetting) -> Result<()>;

    /// Delete a domain's sync setting, returning what was deleted
    fn delete_sync_setting(&self, domain: &str) -> Result<Option<SyncSetting>>;

    // === Per-user cleanup ===

    /// Delete every message, label, sync history and pending queue owned
    /// by `user_ids`, in that order, as one transaction
    ///
    /// Deletes match by predicate, so users without rows are a no-op.
    fn delete_user_data(&self, user_ids: &BTreeSet<UserId>) -> Result<PurgeStats>;

    /// Every user ID that owns at least one message, label, sync history
    /// or pending queue
    fn user_ids_with_data(&self) -> Result<BTreeSet<UserId>>;
}
