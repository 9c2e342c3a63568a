//! Versioned keyed state.
//!
//! Each key owns an ordered history of versions searchable by effective
//! time, so lookups can read the value that was valid at any retained point
//! in event time rather than only the latest one. Histories are pruned as the
//! watermark advances; the newest version of a key is never pruned.

mod history;
mod store;

pub use history::{UpsertOutcome, VersionHistory};
pub use store::{StateStats, VersionedStateStore};
