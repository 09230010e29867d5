//! Per-wallet serialization of sync passes
//!
//! Passes for the same wallet must not overlap; passes for different
//! wallets may run in parallel. A scheduler takes the wallet's guard for
//! the duration of a pass.

use mirror_core::WalletId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per wallet id
#[derive(Debug, Default)]
pub struct WalletSyncLocks {
    locks: Mutex<HashMap<WalletId, Arc<AsyncMutex<()>>>>,
}

#[allow(dead_code)]
fn _assert_wallet_sync_locks_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<WalletSyncLocks>();
}

impl WalletSyncLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, wallet: &WalletId) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(wallet.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `wallet`
    pub async fn lock(&self, wallet: &WalletId) -> OwnedMutexGuard<()> {
        self.entry(wallet).lock_owned().await
    }

    /// Exclusive access to `wallet` if no pass is running
    pub fn try_lock(&self, wallet: &WalletId) -> Option<OwnedMutexGuard<()>> {
        self.entry(wallet).try_lock_owned().ok()
    }

    /// Forget a deleted wallet's lock
    pub fn remove(&self, wallet: &WalletId) {
        self.locks.lock().remove(wallet);
    }
}
