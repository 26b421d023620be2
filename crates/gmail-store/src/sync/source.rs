//! External collaborators used by the sync runner

use anyhow::Result;

use crate::models::{GmailId, Message, UserId};

/// Gmail IDs listed for a user, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListedIds {
    pub gmail_ids: Vec<GmailId>,
    /// History ID to resume from next time, when Gmail returned one
    pub history_id: Option<String>,
}

/// Gmail API access for one domain
pub trait GmailSync: Send + Sync {
    /// List every message ID in the mailbox
    fn list_all(&self, user_id: &UserId) -> Result<ListedIds>;

    /// List message IDs changed since `history_id`
    fn list_since(&self, user_id: &UserId, history_id: &str) -> Result<ListedIds>;

    /// Fetch full messages for the given IDs
    fn fetch_messages(&self, user_id: &UserId, gmail_ids: &[GmailId]) -> Result<Vec<Message>>;
}

/// Google directory lookups
pub trait Directory: Send + Sync {
    /// Every user of the domain
    fn resolve_user_ids(&self) -> Result<Vec<UserId>>;

    /// User owning `email` (primary address or alias)
    fn resolve_user_id_from_email(&self, email: &str) -> Result<Option<UserId>>;
}

/// OAuth client state
pub trait ClientStatus: Send + Sync {
    fn is_authenticated(&self) -> bool;
}
