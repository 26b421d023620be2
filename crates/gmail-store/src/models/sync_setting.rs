//! Per-domain sync configuration

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::UserId;

/// Which users of a domain are enabled for sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSetting {
    pub domain: String,
    pub user_ids: BTreeSet<UserId>,
}

impl SyncSetting {
    pub fn new<I, U>(domain: impl Into<String>, user_ids: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<UserId>,
    {
        Self {
            domain: domain.into(),
            user_ids: user_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_enabled(&self, user_id: &UserId) -> bool {
        self.user_ids.contains(user_id)
    }

    /// Users enabled here but not in `new`
    pub fn removed_user_ids(&self, new: &SyncSetting) -> BTreeSet<UserId> {
        self.user_ids.difference(&new.user_ids).cloned().collect()
    }
}
