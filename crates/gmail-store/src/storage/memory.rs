//! In-memory storage implementation
//!
//! Used for testing and for embedding without a database file.

use anyhow::{Result, anyhow};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::{MailStore, PurgeStats};
use crate::models::{
    GmailId, Label, Message, PendingGmailIds, SyncHistory, SyncSetting, ThreadKey, ThreadPartial,
    UserId,
};
use crate::query::{MessageFilter, Page, SortDirection};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

/// In-memory implementation of MailStore
///
/// Uses maps protected by RwLocks for thread-safe access. Purges take every
/// write lock before touching anything, so readers never observe a
/// half-purged user.
pub struct InMemoryMailStore {
    next_id: AtomicI64,
    /// Messages keyed by Gmail ID
    messages: RwLock<HashMap<GmailId, Message>>,
    labels: RwLock<BTreeSet<Label>>,
    histories: RwLock<HashMap<UserId, SyncHistory>>,
    pending_ids: RwLock<HashMap<UserId, PendingGmailIds>>,
    /// Sync settings keyed by domain
    sync_settings: RwLock<BTreeMap<String, SyncSetting>>,
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            messages: RwLock::new(HashMap::new()),
            labels: RwLock::new(BTreeSet::new()),
            histories: RwLock::new(HashMap::new()),
            pending_ids: RwLock::new(HashMap::new()),
            sync_settings: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryMailStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MailStore for InMemoryMailStore {
    fn upsert_message(&self, mut message: Message) -> Result<i64> {
        let mut messages = write(&self.messages)?;
        let mut labels = write(&self.labels)?;

        let id = match messages.get(&message.gmail_id).and_then(|m| m.id) {
            Some(existing) => existing,
            None => self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        message.id = Some(id);

        message.labels.sort();
        message.labels.dedup();
        labels.extend(message.labels.iter().cloned());

        messages.insert(message.gmail_id.clone(), message);
        Ok(id)
    }

    fn get_message(&self, gmail_id: &GmailId) -> Result<Option<Message>> {
        Ok(read(&self.messages)?.get(gmail_id).cloned())
    }

    fn has_message(&self, gmail_id: &GmailId) -> Result<bool> {
        Ok(read(&self.messages)?.contains_key(gmail_id))
    }

    fn count_messages(&self) -> Result<usize> {
        Ok(read(&self.messages)?.len())
    }

    fn upsert_label(&self, label: Label) -> Result<()> {
        write(&self.labels)?.insert(label);
        Ok(())
    }

    fn list_labels(&self, user_id: &UserId) -> Result<Vec<Label>> {
        let labels = read(&self.labels)?;
        // BTreeSet orders by (user_id, name)
        Ok(labels
            .iter()
            .filter(|label| &label.user_id == user_id)
            .cloned()
            .collect())
    }

    fn thread_partials(
        &self,
        filter: &MessageFilter,
        sort: Option<SortDirection>,
        page: Page,
    ) -> Result<Vec<ThreadPartial>> {
        if filter.matches_nothing() {
            return Ok(Vec::new());
        }

        let messages = read(&self.messages)?;

        let mut latest: BTreeMap<ThreadKey, DateTime<Utc>> = BTreeMap::new();
        for message in messages.values().filter(|m| filter.matches(m)) {
            latest
                .entry(message.thread_key())
                .and_modify(|sent_at| {
                    if message.sent_at > *sent_at {
                        *sent_at = message.sent_at;
                    }
                })
                .or_insert(message.sent_at);
        }

        let mut partials: Vec<ThreadPartial> = latest
            .into_iter()
            .map(|(key, latest_sent_at)| ThreadPartial::new(key, latest_sent_at))
            .collect();

        match sort {
            Some(SortDirection::Ascending) => {
                partials.sort_by(|a, b| a.latest_sent_at.cmp(&b.latest_sent_at))
            }
            Some(SortDirection::Descending) => {
                partials.sort_by(|a, b| b.latest_sent_at.cmp(&a.latest_sent_at))
            }
            None => {}
        }

        Ok(page.apply(partials))
    }

    fn messages_for_partials(
        &self,
        filter: &MessageFilter,
        partials: &[ThreadPartial],
    ) -> Result<Vec<Message>> {
        if partials.is_empty() || filter.matches_nothing() {
            return Ok(Vec::new());
        }

        let wanted: HashMap<&ThreadKey, DateTime<Utc>> = partials
            .iter()
            .map(|p| (&p.key, p.latest_sent_at))
            .collect();

        let messages = read(&self.messages)?;
        let mut result: Vec<Message> = messages
            .values()
            .filter(|m| wanted.get(&m.thread_key()) == Some(&m.sent_at))
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();

        result.sort_by(|a, b| a.gmail_id.cmp(&b.gmail_id));
        Ok(result)
    }

    fn count_distinct_threads(&self, filter: &MessageFilter) -> Result<usize> {
        if filter.matches_nothing() {
            return Ok(0);
        }

        let messages = read(&self.messages)?;
        let keys: HashSet<ThreadKey> = messages
            .values()
            .filter(|m| filter.matches(m))
            .map(Message::thread_key)
            .collect();

        Ok(keys.len())
    }

    fn get_sync_history(&self, user_id: &UserId) -> Result<Option<SyncHistory>> {
        Ok(read(&self.histories)?.get(user_id).cloned())
    }

    fn save_sync_history(&self, history: SyncHistory) -> Result<()> {
        write(&self.histories)?.insert(history.user_id.clone(), history);
        Ok(())
    }

    fn get_pending_ids(&self, user_id: &UserId) -> Result<Option<PendingGmailIds>> {
        Ok(read(&self.pending_ids)?.get(user_id).cloned())
    }

    fn save_pending_ids(&self, pending: PendingGmailIds) -> Result<()> {
        write(&self.pending_ids)?.insert(pending.user_id.clone(), pending);
        Ok(())
    }

    fn get_sync_setting(&self, domain: &str) -> Result<Option<SyncSetting>> {
        Ok(read(&self.sync_settings)?.get(domain).cloned())
    }

    fn first_sync_setting(&self) -> Result<Option<SyncSetting>> {
        Ok(read(&self.sync_settings)?.values().next().cloned())
    }

    fn list_sync_settings(&self) -> Result<Vec<SyncSetting>> {
        Ok(read(&self.sync_settings)?.values().cloned().collect())
    }

    fn save_sync_setting(&self, setting: SyncSetting) -> Result<()> {
        write(&self.sync_settings)?.insert(setting.domain.clone(), setting);
        Ok(())
    }

    fn delete_sync_setting(&self, domain: &str) -> Result<Option<SyncSetting>> {
        Ok(write(&self.sync_settings)?.remove(domain))
    }

    fn delete_user_data(&self, user_ids: &BTreeSet<UserId>) -> Result<PurgeStats> {
        let mut stats = PurgeStats::default();
        if user_ids.is_empty() {
            return Ok(stats);
        }

        // Lock everything up front so the purge is all-or-nothing for readers
        let mut messages = write(&self.messages)?;
        let mut labels = write(&self.labels)?;
        let mut histories = write(&self.histories)?;
        let mut pending_ids = write(&self.pending_ids)?;

        let before = messages.len();
        messages.retain(|_, m| !user_ids.contains(&m.user_id));
        stats.messages = before - messages.len();

        let before = labels.len();
        labels.retain(|label| !user_ids.contains(&label.user_id));
        stats.labels = before - labels.len();

        let before = histories.len();
        histories.retain(|user_id, _| !user_ids.contains(user_id));
        stats.histories = before - histories.len();

        let before = pending_ids.len();
        pending_ids.retain(|user_id, _| !user_ids.contains(user_id));
        stats.pending_ids = before - pending_ids.len();

        Ok(stats)
    }

    fn user_ids_with_data(&self) -> Result<BTreeSet<UserId>> {
        let mut user_ids: BTreeSet<UserId> = read(&self.messages)?
            .values()
            .map(|m| m.user_id.clone())
            .collect();
        user_ids.extend(read(&self.labels)?.iter().map(|l| l.user_id.clone()));
        user_ids.extend(read(&self.histories)?.keys().cloned());
        user_ids.extend(read(&self.pending_ids)?.keys().cloned());
        Ok(user_ids)
    }
}
