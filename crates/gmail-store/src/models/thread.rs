//! Thread identity and per-thread aggregates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// Gmail thread ID
///
/// Thread IDs are only unique within one mailbox. Two users can hold
/// threads with the same ID, so grouping must use [`ThreadKey`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A conversation as seen from one mailbox: (thread ID, user ID)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadKey {
    pub thread_id: ThreadId,
    pub user_id: UserId,
}

impl ThreadKey {
    pub fn new(thread_id: impl Into<ThreadId>, user_id: impl Into<UserId>) -> Self {
        Self {
            thread_id: thread_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// Partial aggregate for one thread: its key and the newest `sent_at`
/// among the messages that matched a filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadPartial {
    pub key: ThreadKey,
    pub latest_sent_at: DateTime<Utc>,
}

impl ThreadPartial {
    pub fn new(key: ThreadKey, latest_sent_at: DateTime<Utc>) -> Self {
        Self {
            key,
            latest_sent_at,
        }
    }
}
