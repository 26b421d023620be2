//! Error types surfaced at the query and cleanup boundaries
//!
//! Store implementations report failures as `anyhow::Error`; these types
//! wrap them unmodified so callers can tell caller mistakes apart from
//! store failures, and one cleanup phase apart from the other.

use std::collections::BTreeSet;

use crate::models::UserId;

/// Errors from thread queries
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Malformed filter, sort or pagination parameter
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The backing store failed
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl QueryError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

/// Errors from the two-phase sync setting cleanup
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    /// The sync setting change itself failed. Nothing was purged.
    #[error("Failed to commit sync setting for {domain}")]
    Trigger {
        domain: String,
        #[source]
        source: anyhow::Error,
    },

    /// The sync setting change is committed but purging its users failed.
    ///
    /// Per-user rows may be orphaned; retrying `reconcile` with `user_ids`
    /// (or running an orphan sweep) is safe.
    #[error("Sync setting committed but purging {count} user(s) failed", count = .user_ids.len())]
    Cleanup {
        user_ids: BTreeSet<UserId>,
        #[source]
        source: anyhow::Error,
    },
}
