//! Sync progress for observers

use mirror_core::WalletId;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sync stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    /// Waiting to start
    Idle,
    /// Fetching the remote tip
    Tip,
    /// Fetching UTXO snapshots and diffs
    Utxos,
    /// Fetching transaction history
    History,
    /// Rewinding after a rollback
    Rewind,
    /// Pass committed
    Complete,
}

impl SyncStage {
    /// Get display name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Tip => "Checking Tip",
            Self::Utxos => "Syncing UTXOs",
            Self::History => "Syncing History",
            Self::Rewind => "Rewinding",
            Self::Complete => "Synced",
        }
    }
}

/// Point-in-time copy of the progress state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Wallet of the current or last pass
    pub wallet: Option<WalletId>,
    /// Current stage
    pub stage: SyncStage,
    /// Remote best height seen by the pass
    pub tip_height: Option<u64>,
    /// History pages fetched in this pass
    pub history_pages: u32,
    /// Rollbacks recovered from in this pass
    pub rollbacks: u32,
    /// Time since the pass started
    pub elapsed: Option<Duration>,
}

/// Sync progress, cheap to clone and share
#[derive(Debug, Clone)]
pub struct SyncProgress {
    inner: Arc<RwLock<ProgressInner>>,
}

#[derive(Debug)]
struct ProgressInner {
    wallet: Option<WalletId>,
    stage: SyncStage,
    tip_height: Option<u64>,
    history_pages: u32,
    rollbacks: u32,
    start_time: Option<Instant>,
    finish_time: Option<Instant>,
}

impl SyncProgress {
    /// Create new progress tracker
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ProgressInner {
                wallet: None,
                stage: SyncStage::Idle,
                tip_height: None,
                history_pages: 0,
                rollbacks: 0,
                start_time: None,
                finish_time: None,
            })),
        }
    }

    /// Start tracking a pass for `wallet`
    pub fn start(&self, wallet: &WalletId) {
        let mut inner = self.inner.write();
        inner.wallet = Some(wallet.clone());
        inner.stage = SyncStage::Tip;
        inner.tip_height = None;
        inner.history_pages = 0;
        inner.rollbacks = 0;
        inner.start_time = Some(Instant::now());
        inner.finish_time = None;
    }

    /// Set stage
    pub fn set_stage(&self, stage: SyncStage) {
        self.inner.write().stage = stage;
    }

    /// Record the remote tip
    pub fn set_tip(&self, height: u64) {
        self.inner.write().tip_height = Some(height);
    }

    /// Count one history page
    pub fn record_history_page(&self) {
        self.inner.write().history_pages += 1;
    }

    /// Count one recovered rollback
    pub fn record_rollback(&self) {
        let mut inner = self.inner.write();
        inner.rollbacks += 1;
        inner.stage = SyncStage::Rewind;
    }

    /// Mark the pass committed
    pub fn finish(&self) {
        let mut inner = self.inner.write();
        inner.stage = SyncStage::Complete;
        inner.finish_time = Some(Instant::now());
    }

    /// Current stage
    pub fn stage(&self) -> SyncStage {
        self.inner.read().stage
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.inner.read();
        let elapsed = inner.start_time.map(|start| match inner.finish_time {
            Some(end) => end.duration_since(start),
            None => start.elapsed(),
        });
        ProgressSnapshot {
            wallet: inner.wallet.clone(),
            stage: inner.stage,
            tip_height: inner.tip_height,
            history_pages: inner.history_pages,
            rollbacks: inner.rollbacks,
            elapsed,
        }
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}
