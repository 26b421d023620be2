//! Queue of Gmail message IDs listed but not yet synced

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{GmailId, UserId};

/// Gmail IDs waiting to be fetched for one user
///
/// The front of the queue holds the most recently seen IDs, which are
/// synced first so that fresh activity shows up before the backlog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingGmailIds {
    pub user_id: UserId,
    pub gmail_ids: Vec<GmailId>,
}

impl PendingGmailIds {
    pub fn new(user_id: impl Into<UserId>, gmail_ids: Vec<GmailId>) -> Self {
        Self {
            user_id: user_id.into(),
            gmail_ids,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.gmail_ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.gmail_ids.len()
    }

    /// Take up to `limit` IDs from the front of the queue
    ///
    /// The remainder keeps its original relative order. Any later
    /// occurrence of an ID taken now is dropped from the remainder as well.
    pub fn split_front(&mut self, limit: usize) -> Vec<GmailId> {
        let take = limit.min(self.gmail_ids.len());
        let now: Vec<GmailId> = self.gmail_ids.drain(..take).collect();

        let taken: HashSet<&GmailId> = now.iter().collect();
        self.gmail_ids.retain(|id| !taken.contains(id));

        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<GmailId> {
        raw.iter().map(|s| GmailId::new(*s)).collect()
    }

    #[test]
    fn test_split_front_preserves_order() {
        let mut pending = PendingGmailIds::new("u1", ids(&["a", "b", "c", "d", "e"]));

        let now = pending.split_front(2);

        assert_eq!(now, ids(&["a", "b"]));
        assert_eq!(pending.gmail_ids, ids(&["c", "d", "e"]));
    }

    #[test]
    fn test_split_front_limit_larger_than_queue() {
        let mut pending = PendingGmailIds::new("u1", ids(&["a", "b"]));

        let now = pending.split_front(10);

        assert_eq!(now, ids(&["a", "b"]));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_split_front_zero() {
        let mut pending = PendingGmailIds::new("u1", ids(&["a", "b"]));
        assert!(pending.split_front(0).is_empty());
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_split_front_drops_duplicates_of_taken_ids() {
        let mut pending = PendingGmailIds::new("u1", ids(&["a", "b", "c", "a", "d"]));

        let now = pending.split_front(2);

        assert_eq!(now, ids(&["a", "b"]));
        assert_eq!(pending.gmail_ids, ids(&["c", "d"]));
    }
}
