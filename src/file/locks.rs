//! Per-account serialization of ledger-changing file operations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Idle entries are pruned once the map grows past this many accounts.
const PRUNE_THRESHOLD: usize = 256;

/// One async mutex per account ID.
///
/// Uploads and deletes of the same account run one at a time, so the quota
/// check and the ledger increment cannot interleave. Different accounts
/// never contend.
#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `account_id`. Released when the guard drops.
    pub async fn acquire(&self, account_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            if locks.len() > PRUNE_THRESHOLD {
                // Only the map holds these; nobody is waiting or inside.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(account_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of accounts currently tracked.
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
