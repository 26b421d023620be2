//! Per-user Gmail history cursor for incremental sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// The most recent Gmail history ID seen for a user
///
/// Persisted separately from messages to enable incremental sync.
/// At most one SyncHistory per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistory {
    pub user_id: UserId,
    /// Gmail historyId to resume from
    pub history_id: String,
    /// When the cursor was last advanced
    pub updated_at: DateTime<Utc>,
}

impl SyncHistory {
    pub fn new(user_id: impl Into<UserId>, history_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            history_id: history_id.into(),
            updated_at: Utc::now(),
        }
    }

    /// Advance the cursor after a successful sync
    pub fn updated(mut self, history_id: impl Into<String>) -> Self {
        self.history_id = history_id.into();
        self.updated_at = Utc::now();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sync_history() {
        let history = SyncHistory::new("u1", "12345");
        assert_eq!(history.user_id.as_str(), "u1");
        assert_eq!(history.history_id, "12345");
    }

    #[test]
    fn test_updated_sync_history() {
        let history = SyncHistory::new("u1", "12345");
        let updated = history.clone().updated("67890");
        assert_eq!(updated.user_id, history.user_id);
        assert_eq!(updated.history_id, "67890");
        assert!(updated.updated_at >= history.updated_at);
    }

    #[test]
    fn test_serialization() {
        let history = SyncHistory::new("u1", "12345");
        let json = serde_json::to_string(&history).unwrap();
        let deserialized: SyncHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(history, deserialized);
    }
}
