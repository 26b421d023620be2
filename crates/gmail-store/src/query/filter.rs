//! Filter, sort and pagination parameters for thread queries

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::models::{LabelBearing, Message, UserId};

/// Predicates a message must satisfy. `None` fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFilter {
    pub flagged: Option<bool>,
    /// Exact domain match
    pub domain: Option<String>,
    /// Exact user match
    pub user_id: Option<UserId>,
    /// Message must carry at least one of these labels.
    /// `Some(vec![])` matches nothing.
    pub label_names: Option<Vec<String>>,
    /// Case-insensitive substring of the raw From header
    pub from: Option<String>,
    /// Case-insensitive substring of the raw To header
    pub to: Option<String>,
}

impl MessageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flagged(mut self, flagged: bool) -> Self {
        self.flagged = Some(flagged);
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn label_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// The same filter with the label constraint removed
    ///
    /// Used when hydrating selected threads so each message comes back with
    /// all of its labels, not only the ones that matched.
    pub fn without_labels(&self) -> Self {
        Self {
            label_names: None,
            ..self.clone()
        }
    }

    /// Whether the filter can never match (explicitly empty label set)
    pub fn matches_nothing(&self) -> bool {
        self.label_names.as_ref().is_some_and(|names| names.is_empty())
    }

    /// Evaluate the filter against a message
    pub fn matches(&self, message: &Message) -> bool {
        if let Some(flagged) = self.flagged
            && message.flagged != flagged
        {
            return false;
        }
        if let Some(domain) = &self.domain
            && &message.domain != domain
        {
            return false;
        }
        if let Some(user_id) = &self.user_id
            && &message.user_id != user_id
        {
            return false;
        }
        if let Some(names) = &self.label_names
            && !message.match_any_label(names)
        {
            return false;
        }
        if let Some(from) = &self.from
            && !contains_ignore_ascii_case(&message.from, from)
        {
            return false;
        }
        if let Some(to) = &self.to
            && !contains_ignore_ascii_case(&message.to, to)
        {
            return false;
        }
        true
    }
}

/// ASCII case-insensitive substring test, matching SQL `LIKE '%needle%'`
fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    haystack
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}

/// Order of results by sent time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for SortDirection {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASC" | "ASCENDING" => Ok(SortDirection::Ascending),
            "DESC" | "DESCENDING" => Ok(SortDirection::Descending),
            _ => Err(QueryError::invalid_argument(format!(
                "invalid sort direction {s:?}, must be ASC or DESC"
            ))),
        }
    }
}

/// Parse an optional sort parameter. Absent means unsorted.
pub fn parse_sort(raw: Option<&str>) -> Result<Option<SortDirection>, QueryError> {
    raw.map(str::parse).transpose()
}

/// Page window over thread groups. Either bound may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Page {
    /// No window: every group
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }

    pub fn limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            offset: None,
        }
    }

    pub fn offset(offset: usize) -> Self {
        Self {
            limit: None,
            offset: Some(offset),
        }
    }

    /// Fill in `limit` when the caller left it open
    pub fn with_default_limit(self, limit: usize) -> Self {
        Self {
            limit: self.limit.or(Some(limit)),
            offset: self.offset,
        }
    }

    /// Apply the window to an already ordered sequence
    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset.unwrap_or(0));
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}
