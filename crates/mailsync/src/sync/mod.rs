//! Sync engine for mirroring a mailbox into the local store
//!
//! A run is idempotent: re-running over the same provider delta stores
//! nothing twice, because candidate IDs are checked against the store
//! before any full fetch.

mod dedup;
mod engine;
mod lock;
mod matcher;

pub use dedup::{dedupe_ids, filter_new};
pub use engine::{MessageWarning, SyncEngine, SyncOptions, SyncStrategy, SyncSummary};
pub use lock::SyncLocks;
pub use matcher::ContactMatcher;
