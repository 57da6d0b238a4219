//! Per-account mutual exclusion for sync runs
//!
//! Two overlapping runs for one account would both read the same history
//! position and race to advance it. A run holds its account's lock from
//! loading the account until the cursor is written.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Default)]
pub struct SyncLocks {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl SyncLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock object for `account_id`, created on first use
    ///
    /// Hand it back with [`SyncLocks::release`] once its guard is dropped.
    pub fn lock_for(&self, account_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(account_id).or_default().clone()
    }

    /// Forget `account_id` unless another caller still holds its lock object
    pub fn release(&self, account_id: i64, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Clones are only taken under the map lock: the map and `lock` are
        // the last two references when nobody else is waiting
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&account_id);
        }
    }

    /// Whether a run for `account_id` currently holds the lock
    pub fn is_locked(&self, account_id: i64) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .get(&account_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of accounts with a live lock object
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
