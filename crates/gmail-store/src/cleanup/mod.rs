//! Purging per-user data when users leave sync configuration

mod coordinator;

pub use coordinator::{CleanupCoordinator, CleanupReport, PendingRemoval};
