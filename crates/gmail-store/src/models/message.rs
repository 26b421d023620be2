//! Message model representing a synced Gmail message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Label, LabelBearing, ThreadId, ThreadKey, UserId};

/// Gmail message ID, unique across all mailboxes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GmailId(pub String);

impl GmailId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for GmailId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for GmailId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single Gmail message as persisted by the sync pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Row identity assigned by the store (None until first persisted)
    pub id: Option<i64>,
    /// Gmail message ID
    pub gmail_id: GmailId,
    /// Gmail thread ID (only unique per user)
    pub thread_id: ThreadId,
    /// Gmail history ID at the time of sync. Informational, never used for ordering.
    pub history_id: String,
    /// Owner of the mailbox this copy of the message lives in
    pub user_id: UserId,
    /// Raw From header
    pub from: String,
    /// Lowercased bare addresses from the From header
    pub from_canonical: String,
    /// Raw To header
    pub to: String,
    /// Lowercased bare addresses from the To header
    pub to_canonical: String,
    /// When the message was sent
    pub sent_at: DateTime<Utc>,
    pub subject: String,
    pub snippet: String,
    /// Plain text body
    pub body_text: Option<String>,
    /// HTML body
    pub body_html: Option<String>,
    /// Google Workspace domain the mailbox belongs to
    pub domain: String,
    pub flagged: bool,
    /// Labels attached to the message (order irrelevant)
    pub labels: Vec<Label>,
}

impl Message {
    /// Create a new message builder
    pub fn builder(
        gmail_id: impl Into<GmailId>,
        thread_id: impl Into<ThreadId>,
        user_id: impl Into<UserId>,
    ) -> MessageBuilder {
        MessageBuilder::new(gmail_id.into(), thread_id.into(), user_id.into())
    }

    /// The (thread, user) pair this message is grouped under
    pub fn thread_key(&self) -> ThreadKey {
        ThreadKey {
            thread_id: self.thread_id.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

impl LabelBearing for Message {
    fn labels(&self) -> &[Label] {
        &self.labels
    }
}

/// Builder for creating Message instances
pub struct MessageBuilder {
    gmail_id: GmailId,
    thread_id: ThreadId,
    user_id: UserId,
    history_id: String,
    from: String,
    from_canonical: Option<String>,
    to: String,
    to_canonical: Option<String>,
    sent_at: Option<DateTime<Utc>>,
    subject: String,
    snippet: String,
    body_text: Option<String>,
    body_html: Option<String>,
    domain: String,
    flagged: bool,
    label_names: Vec<String>,
}

impl MessageBuilder {
    fn new(gmail_id: GmailId, thread_id: ThreadId, user_id: UserId) -> Self {
        Self {
            gmail_id,
            thread_id,
            user_id,
            history_id: String::new(),
            from: String::new(),
            from_canonical: None,
            to: String::new(),
            to_canonical: None,
            sent_at: None,
            subject: String::new(),
            snippet: String::new(),
            body_text: None,
            body_html: None,
            domain: String::new(),
            flagged: false,
            label_names: Vec::new(),
        }
    }

    pub fn history_id(mut self, history_id: impl Into<String>) -> Self {
        self.history_id = history_id.into();
        self
    }

    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Override the canonical sender (derived from `from` otherwise)
    pub fn from_canonical(mut self, from_canonical: impl Into<String>) -> Self {
        self.from_canonical = Some(from_canonical.into());
        self
    }

    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = to.into();
        self
    }

    /// Override the canonical recipients (derived from `to` otherwise)
    pub fn to_canonical(mut self, to_canonical: impl Into<String>) -> Self {
        self.to_canonical = Some(to_canonical.into());
        self
    }

    pub fn sent_at(mut self, sent_at: DateTime<Utc>) -> Self {
        self.sent_at = Some(sent_at);
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn body_text(mut self, body_text: Option<String>) -> Self {
        self.body_text = body_text;
        self
    }

    pub fn body_html(mut self, body_html: Option<String>) -> Self {
        self.body_html = body_html;
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn flagged(mut self, flagged: bool) -> Self {
        self.flagged = flagged;
        self
    }

    /// Label names; each becomes a [`Label`] owned by the message's user
    pub fn labels<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Message {
        let from_canonical = self
            .from_canonical
            .unwrap_or_else(|| canonical_addresses(&self.from));
        let to_canonical = self
            .to_canonical
            .unwrap_or_else(|| canonical_addresses(&self.to));
        let labels = self
            .label_names
            .into_iter()
            .map(|name| Label::new(self.user_id.clone(), name))
            .collect();

        Message {
            id: None,
            gmail_id: self.gmail_id,
            thread_id: self.thread_id,
            history_id: self.history_id,
            user_id: self.user_id,
            from: self.from,
            from_canonical,
            to: self.to,
            to_canonical,
            sent_at: self.sent_at.unwrap_or_else(Utc::now),
            subject: self.subject,
            snippet: self.snippet,
            body_text: self.body_text,
            body_html: self.body_html,
            domain: self.domain,
            flagged: self.flagged,
            labels,
        }
    }
}

/// Reduce an address header to its lowercased bare addresses
///
/// `"John Doe <John@Example.com>, jane@example.com"` becomes
/// `"john@example.com, jane@example.com"`. Commas inside quoted display
/// names do not split addresses.
pub fn canonical_addresses(header: &str) -> String {
    split_addresses(header)
        .into_iter()
        .map(|entry| bare_address(entry).to_lowercase())
        .filter(|addr| !addr.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

fn split_addresses(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in header.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&header[start..]);
    parts
}

/// Extract the address from `"Name <email>"`, or the trimmed input otherwise
fn bare_address(entry: &str) -> &str {
    let entry = entry.trim();

    if let Some(angle_start) = entry.rfind('<')
        && let Some(angle_end) = entry.rfind('>')
        && angle_start < angle_end
    {
        return entry[angle_start + 1..angle_end].trim();
    }

    entry
}
