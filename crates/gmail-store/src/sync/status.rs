//! Whether sync is ready to run

use anyhow::Result;

use super::ClientStatus;
use crate::storage::MailStore;

/// Authenticated and a sync setting exists for `domain`
pub fn is_setup_for_domain(
    status: &dyn ClientStatus,
    store: &dyn MailStore,
    domain: &str,
) -> Result<bool> {
    if !status.is_authenticated() {
        return Ok(false);
    }
    Ok(store.get_sync_setting(domain)?.is_some())
}

/// Authenticated and at least one domain has a sync setting
pub fn is_setup_for_any_domain(status: &dyn ClientStatus, store: &dyn MailStore) -> Result<bool> {
    if !status.is_authenticated() {
        return Ok(false);
    }
    Ok(store.first_sync_setting()?.is_some())
}
