//! Query API over synced messages
//!
//! Thread-level reads: one representative message per conversation,
//! filtered, sorted and paginated at thread granularity.

mod filter;
mod threads;

pub use filter::{MessageFilter, Page, SortDirection, parse_sort};
pub use threads::ThreadDeduplicator;
