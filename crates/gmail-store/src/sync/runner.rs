//! Per-user sync: list new IDs, then fetch a bounded batch of messages

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, info};

use super::{Directory, GmailSync, ListedIds};
use crate::config::StoreConfig;
use crate::models::{GmailId, PendingGmailIds, SyncHistory, UserId};
use crate::storage::MailStore;

/// How IDs are listed for a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    /// No history cursor yet: list the whole mailbox
    Full,
    /// Resume from a stored history ID
    FromHistory(String),
}

/// Pick the listing mode from the stored history cursor
pub fn determine_sync_mode(history: Option<&SyncHistory>) -> SyncMode {
    match history {
        Some(history) => SyncMode::FromHistory(history.history_id.clone()),
        None => SyncMode::Full,
    }
}

/// Why a user was not synced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The domain has no sync setting
    NoSetting,
    /// The user is not enabled in the domain's sync setting
    NotEnabled,
    /// No user owns the requested email address
    UnknownEmail,
}

/// Statistics from syncing one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub mode: SyncMode,
    /// IDs returned by the listing step
    pub ids_listed: usize,
    /// Messages fetched and stored this run
    pub messages_synced: usize,
    /// IDs left in the pending queue for later runs
    pub ids_remaining: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced(SyncStats),
    Skipped(SkipReason),
}

/// Syncs the enabled users of one domain
pub struct SyncRunner {
    store: Arc<dyn MailStore>,
    gmail: Arc<dyn GmailSync>,
    directory: Arc<dyn Directory>,
    domain: String,
    /// Per-user limit used by [`SyncRunner::run`]
    limit_per_user: usize,
}

impl SyncRunner {
    pub fn new(
        store: Arc<dyn MailStore>,
        gmail: Arc<dyn GmailSync>,
        directory: Arc<dyn Directory>,
        domain: impl Into<String>,
    ) -> Self {
        Self::with_config(store, gmail, directory, domain, &StoreConfig::default())
    }

    /// Runner whose [`run`](Self::run) uses `config.sync_limit_per_user`
    pub fn with_config(
        store: Arc<dyn MailStore>,
        gmail: Arc<dyn GmailSync>,
        directory: Arc<dyn Directory>,
        domain: impl Into<String>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            store,
            gmail,
            directory,
            domain: domain.into(),
            limit_per_user: config.sync_limit_per_user,
        }
    }

    /// Sync every directory user with the configured per-user limit
    pub fn run(&self) -> Result<Vec<(UserId, SyncOutcome)>> {
        self.sync_all(self.limit_per_user)
    }

    /// Sync every directory user, up to `limit_per_user` messages each
    pub fn sync_all(&self, limit_per_user: usize) -> Result<Vec<(UserId, SyncOutcome)>> {
        let user_ids = self.directory.resolve_user_ids()?;
        let mut outcomes = Vec::with_capacity(user_ids.len());

        for user_id in user_ids {
            let outcome = self.sync_user(&user_id, limit_per_user)?;
            outcomes.push((user_id, outcome));
        }

        Ok(outcomes)
    }

    /// Sync the user owning `email`
    pub fn sync_email(&self, email: &str, limit: usize) -> Result<SyncOutcome> {
        match self.directory.resolve_user_id_from_email(email)? {
            Some(user_id) => self.sync_user(&user_id, limit),
            None => Ok(SyncOutcome::Skipped(SkipReason::UnknownEmail)),
        }
    }

    /// Sync one user if the domain's sync setting enables them
    ///
    /// Lists IDs (incrementally when a history cursor exists) into the
    /// pending queue, then fetches up to `limit` IDs from its front. The
    /// rest stay queued, in order, for the next run.
    pub fn sync_user(&self, user_id: &UserId, limit: usize) -> Result<SyncOutcome> {
        let Some(setting) = self.store.get_sync_setting(&self.domain)? else {
            debug!("[SYNC] No sync setting for {}", self.domain);
            return Ok(SyncOutcome::Skipped(SkipReason::NoSetting));
        };

        if !setting.is_enabled(user_id) {
            debug!("[SYNC] {} is not enabled for {}", user_id, self.domain);
            return Ok(SyncOutcome::Skipped(SkipReason::NotEnabled));
        }

        let history = self.store.get_sync_history(user_id)?;
        let mode = determine_sync_mode(history.as_ref());
        let ids_listed = self.sync_gmail_ids(user_id, &mode, history)?;
        let (messages_synced, ids_remaining) = self.sync_messages(user_id, limit)?;

        info!(
            "[SYNC] {}: {:?}, {} listed, {} synced, {} remaining",
            user_id, mode, ids_listed, messages_synced, ids_remaining
        );

        Ok(SyncOutcome::Synced(SyncStats {
            mode,
            ids_listed,
            messages_synced,
            ids_remaining,
        }))
    }

    /// List IDs, queue them ahead of older pending IDs, advance the cursor
    fn sync_gmail_ids(
        &self,
        user_id: &UserId,
        mode: &SyncMode,
        history: Option<SyncHistory>,
    ) -> Result<usize> {
        let listed = match mode {
            SyncMode::Full => self.gmail.list_all(user_id)?,
            SyncMode::FromHistory(history_id) => self.gmail.list_since(user_id, history_id)?,
        };
        let ListedIds {
            gmail_ids,
            history_id,
        } = listed;
        let ids_listed = gmail_ids.len();

        if !gmail_ids.is_empty() {
            let existing = self
                .store
                .get_pending_ids(user_id)?
                .map(|pending| pending.gmail_ids)
                .unwrap_or_default();
            let merged = merge_newest_first(gmail_ids, existing);
            self.store
                .save_pending_ids(PendingGmailIds::new(user_id.clone(), merged))?;
        }

        if let Some(history_id) = history_id {
            let history = match history {
                Some(previous) => previous.updated(history_id),
                None => SyncHistory::new(user_id.clone(), history_id),
            };
            self.store.save_sync_history(history)?;
        }

        Ok(ids_listed)
    }

    /// Fetch and store up to `limit` IDs from the front of the queue
    ///
    /// The queue is only shortened after the messages are stored, so a
    /// failed fetch leaves every ID queued.
    fn sync_messages(&self, user_id: &UserId, limit: usize) -> Result<(usize, usize)> {
        let Some(mut pending) = self.store.get_pending_ids(user_id)? else {
            return Ok((0, 0));
        };

        let now = pending.split_front(limit);
        if now.is_empty() {
            return Ok((0, pending.len()));
        }

        let messages = self.gmail.fetch_messages(user_id, &now)?;
        let synced = messages.len();
        for message in messages {
            self.store.upsert_message(message)?;
        }

        let remaining = pending.len();
        self.store.save_pending_ids(pending)?;
        Ok((synced, remaining))
    }
}

/// Newly listed IDs first, then previously queued IDs not listed again
fn merge_newest_first(newest: Vec<GmailId>, existing: Vec<GmailId>) -> Vec<GmailId> {
    let mut seen: HashSet<GmailId> = HashSet::with_capacity(newest.len() + existing.len());
    newest
        .into_iter()
        .chain(existing)
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, SyncSetting};
    use crate::storage::InMemoryMailStore;
    use std::sync::Mutex;

    fn ids(raw: &[&str]) -> Vec<GmailId> {
        raw.iter().map(|s| GmailId::new(*s)).collect()
    }

    /// Scripted Gmail API: fixed listings, records fetch calls
    #[derive(Default)]
    struct FakeGmail {
        full: Vec<GmailId>,
        since: Vec<GmailId>,
        history_id: Option<String>,
        fetched: Mutex<Vec<Vec<GmailId>>>,
        listed_since: Mutex<Vec<String>>,
    }

    impl GmailSync for FakeGmail {
        fn list_all(&self, _user_id: &UserId) -> Result<ListedIds> {
            Ok(ListedIds {
                gmail_ids: self.full.clone(),
                history_id: self.history_id.clone(),
            })
        }

        fn list_since(&self, _user_id: &UserId, history_id: &str) -> Result<ListedIds> {
            self.listed_since.lock().unwrap().push(history_id.to_string());
            Ok(ListedIds {
                gmail_ids: self.since.clone(),
                history_id: self.history_id.clone(),
            })
        }

        fn fetch_messages(&self, user_id: &UserId, gmail_ids: &[GmailId]) -> Result<Vec<Message>> {
            self.fetched.lock().unwrap().push(gmail_ids.to_vec());
            Ok(gmail_ids
                .iter()
                .map(|id| Message::builder(id.clone(), "t1", user_id.clone()).build())
                .collect())
        }
    }

    struct FakeDirectory;

    impl Directory for FakeDirectory {
        fn resolve_user_ids(&self) -> Result<Vec<UserId>> {
            Ok(vec![UserId::new("alice"), UserId::new("bob")])
        }

        fn resolve_user_id_from_email(&self, email: &str) -> Result<Option<UserId>> {
            Ok(match email {
                "alice@corp.com" => Some(UserId::new("alice")),
                _ => None,
            })
        }
    }

    fn runner(store: Arc<InMemoryMailStore>, gmail: Arc<FakeGmail>) -> SyncRunner {
        SyncRunner::new(store, gmail, Arc::new(FakeDirectory), "corp.com")
    }

    #[test]
    fn test_determine_sync_mode() {
        assert_eq!(determine_sync_mode(None), SyncMode::Full);
        let history = SyncHistory::new("u1", "42");
        assert_eq!(
            determine_sync_mode(Some(&history)),
            SyncMode::FromHistory("42".to_string())
        );
    }

    #[test]
    fn test_merge_newest_first() {
        let merged = merge_newest_first(ids(&["d", "b"]), ids(&["a", "b", "c"]));
        assert_eq!(merged, ids(&["d", "b", "a", "c"]));
    }

    #[test]
    fn test_skips_without_setting() {
        let store = Arc::new(InMemoryMailStore::new());
        let runner = runner(store, Arc::new(FakeGmail::default()));

        let outcome = runner.sync_user(&UserId::new("alice"), 10).unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::NoSetting));
    }

    #[test]
    fn test_skips_users_not_enabled() {
        let store = Arc::new(InMemoryMailStore::new());
        store.save_sync_setting(SyncSetting::new("corp.com", ["alice"])).unwrap();
        let gmail = Arc::new(FakeGmail::default());
        let runner = runner(store, gmail.clone());

        let outcomes = runner.sync_all(10).unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0].1, SyncOutcome::Synced(_)));
        assert_eq!(outcomes[1].1, SyncOutcome::Skipped(SkipReason::NotEnabled));
    }

    #[test]
    fn test_full_sync_consumes_front_of_queue() {
        let store = Arc::new(InMemoryMailStore::new());
        store.save_sync_setting(SyncSetting::new("corp.com", ["alice"])).unwrap();
        let gmail = Arc::new(FakeGmail {
            full: ids(&["m5", "m4", "m3", "m2", "m1"]),
            history_id: Some("100".to_string()),
            ..Default::default()
        });
        let runner = runner(store.clone(), gmail.clone());
        let alice = UserId::new("alice");

        let outcome = runner.sync_user(&alice, 2).unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Synced(SyncStats {
                mode: SyncMode::Full,
                ids_listed: 5,
                messages_synced: 2,
                ids_remaining: 3,
            })
        );
        assert_eq!(gmail.fetched.lock().unwrap()[0], ids(&["m5", "m4"]));
        assert_eq!(
            store.get_pending_ids(&alice).unwrap().unwrap().gmail_ids,
            ids(&["m3", "m2", "m1"])
        );
        assert_eq!(store.get_sync_history(&alice).unwrap().unwrap().history_id, "100");
        assert_eq!(store.count_messages().unwrap(), 2);
    }

    #[test]
    fn test_incremental_sync_uses_history_and_prioritizes_new_ids() {
        let store = Arc::new(InMemoryMailStore::new());
        store.save_sync_setting(SyncSetting::new("corp.com", ["alice"])).unwrap();
        store.save_sync_history(SyncHistory::new("alice", "100")).unwrap();
        store
            .save_pending_ids(PendingGmailIds::new("alice", ids(&["old1", "old2"])))
            .unwrap();
        let gmail = Arc::new(FakeGmail {
            since: ids(&["new1"]),
            history_id: Some("200".to_string()),
            ..Default::default()
        });
        let runner = runner(store.clone(), gmail.clone());
        let alice = UserId::new("alice");

        let outcome = runner.sync_user(&alice, 2).unwrap();

        let SyncOutcome::Synced(stats) = outcome else {
            panic!("expected a sync");
        };
        assert_eq!(stats.mode, SyncMode::FromHistory("100".to_string()));
        assert_eq!(gmail.listed_since.lock().unwrap().as_slice(), ["100".to_string()]);
        assert_eq!(gmail.fetched.lock().unwrap()[0], ids(&["new1", "old1"]));
        assert_eq!(
            store.get_pending_ids(&alice).unwrap().unwrap().gmail_ids,
            ids(&["old2"])
        );
        assert_eq!(store.get_sync_history(&alice).unwrap().unwrap().history_id, "200");
    }

    #[test]
    fn test_run_uses_configured_limit() {
        let store = Arc::new(InMemoryMailStore::new());
        store.save_sync_setting(SyncSetting::new("corp.com", ["alice"])).unwrap();
        let gmail = Arc::new(FakeGmail {
            full: ids(&["m4", "m3", "m2", "m1"]),
            ..Default::default()
        });
        let config = StoreConfig {
            sync_limit_per_user: 3,
            ..StoreConfig::default()
        };
        let runner = SyncRunner::with_config(
            store.clone(),
            gmail.clone(),
            Arc::new(FakeDirectory),
            "corp.com",
            &config,
        );

        let outcomes = runner.run().unwrap();

        let SyncOutcome::Synced(stats) = &outcomes[0].1 else {
            panic!("expected alice to sync");
        };
        assert_eq!(stats.messages_synced, 3);
        assert_eq!(stats.ids_remaining, 1);
        assert_eq!(gmail.fetched.lock().unwrap()[0], ids(&["m4", "m3", "m2"]));
    }

    #[test]
    fn test_sync_email() {
        let store = Arc::new(InMemoryMailStore::new());
        store.save_sync_setting(SyncSetting::new("corp.com", ["alice"])).unwrap();
        let runner = runner(store, Arc::new(FakeGmail::default()));

        assert!(matches!(
            runner.sync_email("alice@corp.com", 10).unwrap(),
            SyncOutcome::Synced(_)
        ));
        assert_eq!(
            runner.sync_email("nobody@corp.com", 10).unwrap(),
            SyncOutcome::Skipped(SkipReason::UnknownEmail)
        );
    }
}
