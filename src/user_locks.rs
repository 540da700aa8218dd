//! # Per-User Serialization
//!
//! Read-modify-write sequences on a user's pantry and shopping rows run
//! under that user's lock. Users never contend with each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry of one async mutex per user
///
/// The registry map itself sits behind a short-lived std mutex; the per-user
/// locks are tokio mutexes so a guard can be held across storage awaits.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user_id`'s rows
    pub async fn lock(&self, user_id: i64) -> OwnedMutexGuard<()> {
        self.handle(user_id).lock_owned().await
    }

    fn handle(&self, user_id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(user_id).or_default())
    }

    /// Number of users seen so far
    pub fn user_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}
