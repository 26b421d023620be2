//! Latest-message-per-thread queries

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use super::{MessageFilter, Page, SortDirection};
use crate::config::StoreConfig;
use crate::error::QueryError;
use crate::models::{Message, ThreadKey};
use crate::storage::MailStore;

/// Selects the newest message of each (thread ID, user ID) pair
///
/// Works in two steps so that pagination applies to threads rather than
/// messages:
/// 1. Ask the store for partial aggregates (key + newest `sent_at`) of the
///    filtered messages, sorted and windowed.
/// 2. Hydrate the surviving partials into full messages. The label
///    constraint is dropped here so every message carries all of its
///    labels; it already did its job during selection.
pub struct ThreadDeduplicator {
    store: Arc<dyn MailStore>,
    /// Limit applied when a page leaves it open
    default_page_size: Option<usize>,
}

impl ThreadDeduplicator {
    /// Deduplicator without a default page size: open pages return every thread
    pub fn new(store: Arc<dyn MailStore>) -> Self {
        Self {
            store,
            default_page_size: None,
        }
    }

    /// Deduplicator that caps open pages at `config.default_page_size`
    pub fn with_config(store: Arc<dyn MailStore>, config: &StoreConfig) -> Self {
        Self {
            store,
            default_page_size: Some(config.default_page_size),
        }
    }

    /// The latest message of every matching thread
    ///
    /// Results follow the order of the thread window: by `sent_at` in
    /// `sort` direction, or store order when unsorted. When two messages
    /// of a thread share the newest `sent_at`, one that matches the full
    /// filter (labels included) is preferred.
    pub fn find_latest_per_thread(
        &self,
        filter: &MessageFilter,
        sort: Option<SortDirection>,
        page: Page,
    ) -> Result<Vec<Message>, QueryError> {
        if filter.matches_nothing() {
            return Ok(Vec::new());
        }

        let page = match self.default_page_size {
            Some(size) => page.with_default_limit(size),
            None => page,
        };

        let partials = self.store.thread_partials(filter, sort, page)?;
        if partials.is_empty() {
            return Ok(Vec::new());
        }

        let hydrated = self
            .store
            .messages_for_partials(&filter.without_labels(), &partials)?;

        debug!(
            "[QUERY] {} thread(s) selected, {} message(s) hydrated",
            partials.len(),
            hydrated.len()
        );

        let mut by_key: HashMap<ThreadKey, Message> = HashMap::with_capacity(partials.len());
        for message in hydrated {
            let key = message.thread_key();
            if let Some(kept) = by_key.get(&key) {
                warn!(
                    "[QUERY] Thread {} of {} has several messages at {}, keeping one",
                    key.thread_id.as_str(),
                    key.user_id,
                    message.sent_at
                );
                // Hydration ignores labels; prefer a copy the caller's labels select
                if filter.matches(kept) || !filter.matches(&message) {
                    continue;
                }
            }
            by_key.insert(key, message);
        }

        Ok(partials
            .iter()
            .filter_map(|partial| by_key.remove(&partial.key))
            .collect())
    }

    /// Number of distinct (thread ID, user ID) pairs among matching messages
    pub fn count_distinct_threads(&self, filter: &MessageFilter) -> Result<usize, QueryError> {
        if filter.matches_nothing() {
            return Ok(0);
        }
        Ok(self.store.count_distinct_threads(filter)?)
    }
}
