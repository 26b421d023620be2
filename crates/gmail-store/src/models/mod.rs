//! Domain models for persisted Gmail sync records

mod label;
mod message;
mod pending_ids;
mod sync_history;
mod sync_setting;
mod thread;
mod user;

pub use label::{Label, LabelBearing};
pub use message::{GmailId, Message, MessageBuilder};
pub use pending_ids::PendingGmailIds;
pub use sync_history::SyncHistory;
pub use sync_setting::SyncSetting;
pub use thread::{ThreadId, ThreadKey, ThreadPartial};
pub use user::UserId;
