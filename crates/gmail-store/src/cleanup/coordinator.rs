//! Two-phase cleanup around sync setting changes
//!
//! Phase one commits the sync setting change and yields the set of users
//! it dropped. Phase two purges those users in a separate store
//! transaction. A crash between the phases leaves orphaned per-user rows;
//! [`CleanupCoordinator::sweep_orphans`] removes them later.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, info, warn};

use crate::error::CleanupError;
use crate::models::{SyncSetting, UserId};
use crate::storage::{MailStore, PurgeStats};

/// Users dropped by a committed sync setting change, waiting to be purged
///
/// Produced by the staging phase and consumed by
/// [`CleanupCoordinator::apply`], so each removal set is purged at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a staged removal does nothing until applied"]
pub struct PendingRemoval {
    domain: String,
    user_ids: BTreeSet<UserId>,
}

impl PendingRemoval {
    /// Users present in `old` but missing from `new`
    pub fn from_update(old: Option<&SyncSetting>, new: &SyncSetting) -> Self {
        Self {
            domain: new.domain.clone(),
            user_ids: old.map(|old| old.removed_user_ids(new)).unwrap_or_default(),
        }
    }

    /// Every user of a deleted setting
    pub fn from_deletion(setting: &SyncSetting) -> Self {
        Self {
            domain: setting.domain.clone(),
            user_ids: setting.user_ids.clone(),
        }
    }

    /// Nothing to purge for `domain`
    pub fn none(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            user_ids: BTreeSet::new(),
        }
    }

    /// Keep only users no remaining setting enables
    pub fn retain_unconfigured(&mut self, settings: &[SyncSetting]) {
        self.user_ids
            .retain(|user_id| !settings.iter().any(|s| s.is_enabled(user_id)));
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn user_ids(&self) -> &BTreeSet<UserId> {
        &self.user_ids
    }

    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }
}

/// Outcome of a sync setting change and its purge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub domain: String,
    pub removed_user_ids: BTreeSet<UserId>,
    pub purged: PurgeStats,
}

/// Applies sync setting changes and purges the data of dropped users
pub struct CleanupCoordinator {
    store: Arc<dyn MailStore>,
}

impl CleanupCoordinator {
    pub fn new(store: Arc<dyn MailStore>) -> Self {
        Self { store }
    }

    /// Save a domain's sync setting, then purge users it no longer enables
    pub fn update_sync_setting(&self, setting: SyncSetting) -> Result<CleanupReport, CleanupError> {
        let pending = self.stage_update(setting)?;
        self.apply(pending)
    }

    /// Delete a domain's sync setting, then purge all of its users
    ///
    /// Deleting a domain without a setting is a no-op.
    pub fn delete_sync_setting(&self, domain: &str) -> Result<CleanupReport, CleanupError> {
        let pending = self.stage_deletion(domain)?;
        self.apply(pending)
    }

    /// Phase one of an update: commit the setting, return who was dropped
    pub fn stage_update(&self, setting: SyncSetting) -> Result<PendingRemoval, CleanupError> {
        let domain = setting.domain.clone();
        let trigger = |source: anyhow::Error| CleanupError::Trigger {
            domain: domain.clone(),
            source,
        };

        let old = self.store.get_sync_setting(&domain).map_err(trigger)?;
        let pending = PendingRemoval::from_update(old.as_ref(), &setting);
        self.store.save_sync_setting(setting).map_err(trigger)?;

        debug!(
            "[CLEANUP] Committed sync setting for {} ({} user(s) dropped)",
            domain,
            pending.user_ids.len()
        );
        Ok(pending)
    }

    /// Phase one of a deletion: delete the setting, return its users
    pub fn stage_deletion(&self, domain: &str) -> Result<PendingRemoval, CleanupError> {
        let deleted = self
            .store
            .delete_sync_setting(domain)
            .map_err(|source| CleanupError::Trigger {
                domain: domain.to_string(),
                source,
            })?;

        Ok(match deleted {
            Some(setting) => PendingRemoval::from_deletion(&setting),
            None => PendingRemoval::none(domain),
        })
    }

    /// Phase two: purge staged users once their setting change is committed
    ///
    /// Users still enabled by another domain's setting are kept.
    pub fn apply(&self, mut pending: PendingRemoval) -> Result<CleanupReport, CleanupError> {
        if !pending.is_empty() {
            let settings =
                self.store
                    .list_sync_settings()
                    .map_err(|source| CleanupError::Cleanup {
                        user_ids: pending.user_ids.clone(),
                        source,
                    })?;
            pending.retain_unconfigured(&settings);
        }

        let purged = self
            .reconcile(&pending.user_ids)
            .map_err(|source| CleanupError::Cleanup {
                user_ids: pending.user_ids.clone(),
                source,
            })?;

        Ok(CleanupReport {
            domain: pending.domain,
            removed_user_ids: pending.user_ids,
            purged,
        })
    }

    /// Delete every message, label, sync history and pending queue of
    /// `user_ids`
    ///
    /// Idempotent: users without data are skipped silently.
    pub fn reconcile(&self, user_ids: &BTreeSet<UserId>) -> Result<PurgeStats> {
        if user_ids.is_empty() {
            return Ok(PurgeStats::default());
        }

        let stats = self.store.delete_user_data(user_ids)?;
        info!(
            "[CLEANUP] Purged {} user(s): {} messages, {} labels, {} histories, {} pending queues",
            user_ids.len(),
            stats.messages,
            stats.labels,
            stats.histories,
            stats.pending_ids
        );
        Ok(stats)
    }

    /// Purge data owned by users that no sync setting enables
    ///
    /// Recovers from a crash between committing a setting change and its
    /// purge.
    pub fn sweep_orphans(&self) -> Result<PurgeStats> {
        let configured: BTreeSet<UserId> = self
            .store
            .list_sync_settings()?
            .into_iter()
            .flat_map(|setting| setting.user_ids)
            .collect();

        let orphans: BTreeSet<UserId> = self
            .store
            .user_ids_with_data()?
            .difference(&configured)
            .cloned()
            .collect();

        if orphans.is_empty() {
            return Ok(PurgeStats::default());
        }

        warn!("[CLEANUP] Found data for {} unconfigured user(s)", orphans.len());
        self.reconcile(&orphans)
    }
}
