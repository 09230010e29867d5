//! Sync engine
//!
//! A pass reads a snapshot of the wallet from the store, fetches everything
//! it needs from the indexer, and applies the result in one store
//! transaction. Nothing is written before the commit, so a failed or
//! cancelled pass leaves the store as it was. A rollback reported by the
//! indexer rewinds the wallet (to its safe point, then to genesis) and the
//! pass is retried.
//!
//! Every committed pass leaves the UTXO set, the history and the cursor
//! describing the same block. A history-only pass derives the UTXO set by
//! replaying the merged transactions instead of asking the indexer.

use crate::client::IndexerClient;
use crate::history::HistoryPlan;
use crate::progress::SyncStage;
use crate::utxo_sync::{replay_plan, UtxoPlan};
use crate::{CancelToken, Error, Result, SyncProgress};
use mirror_core::{
    BlockInfo, ChainId, TipStatus, TxPosition, TxState, UtxoCapable, WalletHandle, WalletId,
};
use mirror_params::{Network, DEFAULT_SAFE_POINT_INTERVAL};
use mirror_storage_sqlite::{
    busy_backoff, load_cursor_tx, rewind_wallet, save_cursor_tx, AddressCutoffManager,
    AddressRecord, BlockPointer, Database, MergeOutcome, Repository, RewindTarget,
    SafePointManager, SyncCursor, UtxoSafePoint,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

/// Default confirmed transactions per history page
pub const DEFAULT_HISTORY_PAGE_SIZE: usize = 50;

/// Default rewinds attempted within one call before giving up
pub const DEFAULT_MAX_ROLLBACK_RETRIES: u32 = 2;

/// Default deadline for a single indexer call
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Sync configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Confirmed transactions requested per history page
    pub history_page_size: usize,
    /// Blocks the safe block must advance past the stored safe point before
    /// a new snapshot is taken
    pub safe_point_interval: u64,
    /// Rewinds attempted within one call; the first goes to the safe point,
    /// later ones to genesis
    pub max_rollback_retries: u32,
    /// Deadline for each indexer call
    pub remote_timeout: Duration,
}

impl SyncConfig {
    /// Defaults for a network
    pub fn from_network(network: &Network) -> Self {
        Self {
            safe_point_interval: network.safe_point_interval,
            ..Default::default()
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            safe_point_interval: DEFAULT_SAFE_POINT_INTERVAL,
            max_rollback_retries: DEFAULT_MAX_ROLLBACK_RETRIES,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }
}

/// What a committed pass changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Synced wallet
    pub wallet: WalletId,
    /// Remote best block the pass synced to
    pub tip: BlockInfo,
    /// Addresses derived into the gap window
    pub addresses_derived: usize,
    /// UTXOs inserted
    pub utxos_added: usize,
    /// UTXOs deleted
    pub utxos_removed: usize,
    /// New transaction rows
    pub transactions_inserted: usize,
    /// Pending rows whose remote state changed
    pub transactions_updated: usize,
    /// Failed rows replaced by a confirmed transaction
    pub transactions_replaced: usize,
    /// Pending rows the remote no longer knows
    pub transactions_failed: usize,
    /// Height of a safe point stored by this pass
    pub safe_point_height: Option<u64>,
    /// Rollbacks recovered from before the commit
    pub rollbacks: u32,
    /// Block rows no longer referenced after the pass
    pub blocks_released: usize,
}

impl SyncReport {
    fn new(wallet: WalletId, tip: BlockInfo) -> Self {
        Self {
            wallet,
            tip,
            addresses_derived: 0,
            utxos_added: 0,
            utxos_removed: 0,
            transactions_inserted: 0,
            transactions_updated: 0,
            transactions_replaced: 0,
            transactions_failed: 0,
            safe_point_height: None,
            rollbacks: 0,
            blocks_released: 0,
        }
    }

    /// Fold a follow-up pass into this report
    fn absorb(&mut self, later: SyncReport) {
        self.tip = later.tip;
        self.addresses_derived += later.addresses_derived;
        self.utxos_added += later.utxos_added;
        self.utxos_removed += later.utxos_removed;
        self.transactions_inserted += later.transactions_inserted;
        self.transactions_updated += later.transactions_updated;
        self.transactions_replaced += later.transactions_replaced;
        self.transactions_failed += later.transactions_failed;
        self.safe_point_height = later.safe_point_height.or(self.safe_point_height);
        self.blocks_released += later.blocks_released;
    }

    /// Whether the pass wrote anything besides the cursor
    pub fn is_noop(&self) -> bool {
        self.addresses_derived == 0
            && self.utxos_added == 0
            && self.utxos_removed == 0
            && self.transactions_inserted == 0
            && self.transactions_updated == 0
            && self.transactions_replaced == 0
            && self.transactions_failed == 0
            && self.safe_point_height.is_none()
    }
}

/// Wallet state read at the start of a pass
#[derive(Debug, Clone)]
pub(crate) struct WalletSnapshot {
    pub wallet: WalletId,
    /// Every address the pass queries, including `derived`
    pub addresses: Vec<String>,
    /// Window addresses not yet recorded
    pub derived: Vec<AddressRecord>,
    pub cursor: Option<SyncCursor>,
    /// Chain position of the history cursor's transaction
    pub cursor_position: Option<TxPosition>,
    pub safe_point: Option<UtxoSafePoint>,
    /// Hashes of local pending transactions
    pub pending: Vec<String>,
}

impl WalletSnapshot {
    /// Addresses first recorded by this pass
    pub fn fresh_owned(&self) -> BTreeSet<String> {
        self.derived.iter().map(|record| record.hash.clone()).collect()
    }

    pub fn fresh_addresses(&self) -> Vec<String> {
        self.fresh_owned().into_iter().collect()
    }

    /// Addresses recorded before this pass
    pub fn known_addresses(&self) -> Vec<String> {
        let fresh = self.fresh_owned();
        self.addresses
            .iter()
            .filter(|address| !fresh.contains(*address))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassKind {
    /// UTXOs from the indexer's snapshot and diff endpoints
    Full,
    /// UTXOs replayed from the merged history
    HistoryOnly,
}

/// Sync engine over an injected indexer client
pub struct SyncEngine<C: IndexerClient> {
    pub(crate) client: C,
    pub(crate) config: SyncConfig,
    pub(crate) progress: SyncProgress,
    pub(crate) cancel: CancelToken,
}

#[allow(dead_code)]
fn _assert_sync_engine_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<SyncEngine<crate::HttpIndexerClient>>();
}

impl<C: IndexerClient> SyncEngine<C> {
    /// Create new sync engine
    pub fn new(client: C, config: SyncConfig) -> Self {
        Self {
            client,
            config,
            progress: SyncProgress::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Use a cancellation token shared with the caller
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Progress tracker
    pub fn progress(&self) -> SyncProgress {
        self.progress.clone()
    }

    /// Cancellation token
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Indexer client
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Bring the wallet's UTXO set up to the remote tip from the indexer's
    /// UTXO endpoints. The confirmed transactions that produced the set are
    /// merged in the same commit, so this is a full pass.
    pub async fn sync_utxos(&self, db: &mut Database, wallet: &WalletHandle) -> Result<SyncReport> {
        self.run(db, wallet, PassKind::Full).await
    }

    /// Bring the wallet's transaction history up to the remote tip. The
    /// UTXO set follows by replaying the merged transactions onto the
    /// stored one, without snapshot or diff calls.
    pub async fn sync_history(
        &self,
        db: &mut Database,
        wallet: &WalletHandle,
    ) -> Result<SyncReport> {
        self.run(db, wallet, PassKind::HistoryOnly).await
    }

    /// Sync UTXOs and history in one pass
    pub async fn sync_wallet(&self, db: &mut Database, wallet: &WalletHandle) -> Result<SyncReport> {
        self.run(db, wallet, PassKind::Full).await
    }

    async fn run(
        &self,
        db: &mut Database,
        wallet: &WalletHandle,
        kind: PassKind,
    ) -> Result<SyncReport> {
        let id = wallet.wallet_id().clone();
        self.progress.start(&id);
        let mut rollbacks = 0;
        let mut total: Option<SyncReport> = None;

        loop {
            match self.pass(db, wallet, kind).await {
                Ok(report) => {
                    let mut report = match total.take() {
                        Some(mut earlier) => {
                            earlier.absorb(report);
                            earlier
                        }
                        None => report,
                    };
                    report.rollbacks = rollbacks;

                    // Newly used addresses widen the gap window; sync the
                    // new addresses before returning.
                    if window_has_gaps(db, wallet)? {
                        tracing::debug!("Gap window of wallet {} grew, running another pass", id);
                        total = Some(report);
                        continue;
                    }

                    self.progress.finish();
                    tracing::info!(
                        "Synced wallet {} to height {}: +{}/-{} UTXOs, {} new, {} updated, {} failed transactions",
                        report.wallet,
                        report.tip.height,
                        report.utxos_added,
                        report.utxos_removed,
                        report.transactions_inserted,
                        report.transactions_updated + report.transactions_replaced,
                        report.transactions_failed
                    );
                    return Ok(report);
                }
                Err(Error::Rollback(reason)) if rollbacks < self.config.max_rollback_retries => {
                    self.cancel.check()?;
                    let target = if rollbacks == 0 {
                        RewindTarget::SafePoint
                    } else {
                        RewindTarget::Genesis
                    };
                    tracing::warn!(
                        "Rollback during sync of wallet {}: {} (rewinding to {:?})",
                        id,
                        reason,
                        target
                    );
                    self.progress.record_rollback();
                    with_busy_retry("rewind", || rewind_wallet(db, &id, target)).await?;
                    rollbacks += 1;
                }
                Err(e) => {
                    tracing::warn!("Sync of wallet {} failed: {}", id, e);
                    return Err(e);
                }
            }
        }
    }

    async fn pass(
        &self,
        db: &mut Database,
        wallet: &WalletHandle,
        kind: PassKind,
    ) -> Result<SyncReport> {
        let snapshot = read_snapshot(db, wallet)?;

        self.progress.set_stage(SyncStage::Tip);
        let tip = self.remote("tip status", self.client.get_tip_status()).await?;
        check_tip(&tip)?;
        self.progress.set_tip(tip.best_block.height);
        tracing::debug!(
            "Remote tip {} (safe {}) for wallet {}",
            tip.best_block.height,
            tip.safe_block.height,
            snapshot.wallet
        );

        self.progress.set_stage(SyncStage::History);
        let history = self.fetch_history(&snapshot, &tip).await?;

        let utxos = match kind {
            PassKind::Full => {
                self.progress.set_stage(SyncStage::Utxos);
                Some(self.fetch_utxos(&snapshot, &tip, &history.fresh).await?)
            }
            PassKind::HistoryOnly => None,
        };

        self.cancel.check()?;
        let now = chrono::Utc::now().timestamp();
        let report = with_busy_retry("commit", || {
            let tx = db.transaction()?;
            let report = apply_pass(&tx, &snapshot, &tip, utxos.as_ref(), &history, now)?;
            tx.commit()?;
            Ok(report)
        })
        .await?;
        Ok(report)
    }

    /// Run one indexer call under the pass deadline and cancellation token
    pub(crate) async fn remote<T, F>(&self, what: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.cancel.check()?;
        match tokio::time::timeout(self.config.remote_timeout, self.cancel.run(call)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{} took longer than {:?}",
                what, self.config.remote_timeout
            ))),
        }
    }
}

/// Run a store operation, retrying it while SQLite reports the database as
/// busy. The backoff sleeps on the runtime, never on the worker thread.
pub(crate) async fn with_busy_retry<F, T>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> mirror_storage_sqlite::Result<T>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                match busy_backoff(&e, attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            "Database busy during {}, retry {} in {:?}",
                            what,
                            attempt,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e.into()),
                }
            }
        }
    }
}

/// Whether the committed state leaves window addresses underived
fn window_has_gaps(db: &Database, wallet: &WalletHandle) -> Result<bool> {
    let Ok(cutoff) = wallet.as_cutoff() else {
        return Ok(false);
    };
    let manager = AddressCutoffManager::new(db.conn());
    for chain in ChainId::ALL {
        if !manager.missing_in_window(cutoff, chain)?.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn check_tip(tip: &TipStatus) -> Result<()> {
    if tip.safe_block.height > tip.best_block.height {
        return Err(Error::Remote(format!(
            "safe block {} is above best block {}",
            tip.safe_block.height, tip.best_block.height
        )));
    }
    Ok(())
}

/// Read everything a pass needs from the store in one read transaction
fn read_snapshot(db: &mut Database, wallet: &WalletHandle) -> Result<WalletSnapshot> {
    let id = wallet.wallet_id();
    let tx = db.read_transaction()?;
    let repo = Repository::on(&tx);

    let record = repo.require_wallet(id)?;
    if record.kind != wallet.kind() {
        return Err(Error::Storage(mirror_storage_sqlite::Error::Validation(
            format!(
                "wallet {} is stored as {} but was opened as {}",
                id,
                record.kind.as_str(),
                wallet.kind().as_str()
            ),
        )));
    }

    let mut derived = Vec::new();
    if let Ok(cutoff) = wallet.as_cutoff() {
        let manager = AddressCutoffManager::new(&tx);
        for chain in ChainId::ALL {
            derived.extend(manager.missing_in_window(cutoff, chain)?);
        }
    }

    let mut addresses = repo.address_set(id)?;
    addresses.extend(derived.iter().map(|record| record.hash.clone()));

    let cursor = load_cursor_tx(&tx, id)?;
    let cursor_position = match cursor.as_ref().and_then(|c| c.history.as_ref()) {
        Some(history) => repo
            .get_transaction(id, &history.tx_hash)?
            .and_then(|t| t.position()),
        None => None,
    };

    let snapshot = WalletSnapshot {
        wallet: id.clone(),
        addresses: addresses.into_iter().collect(),
        derived,
        cursor,
        cursor_position,
        safe_point: SafePointManager::new(&tx).get(id)?,
        pending: repo
            .transactions_in_state(id, TxState::Pending)?
            .into_iter()
            .map(|t| t.hash)
            .collect(),
    };
    Ok(snapshot)
}

/// Write a pass's results inside an open transaction
fn apply_pass(
    conn: &Connection,
    snapshot: &WalletSnapshot,
    tip: &TipStatus,
    utxos: Option<&UtxoPlan>,
    history: &HistoryPlan,
    now: i64,
) -> mirror_storage_sqlite::Result<SyncReport> {
    let wallet = &snapshot.wallet;
    let repo = Repository::on(conn);
    let mut report = SyncReport::new(wallet.clone(), tip.best_block.clone());

    // Their history and outputs are part of this commit, so the stored safe
    // point and cursor stay valid.
    for record in &snapshot.derived {
        if !repo.record_address(record)? {
            return Err(mirror_storage_sqlite::Error::InvariantViolation(format!(
                "address {} of wallet {} is already recorded at another position",
                record.hash, record.wallet_id
            )));
        }
    }
    report.addresses_derived = snapshot.derived.len();

    let replayed;
    let utxos = match utxos {
        Some(plan) => plan,
        None => {
            replayed = replay_plan(repo.get_utxos(wallet)?, snapshot, tip, history);
            &replayed
        }
    };

    if let Some(point) = &utxos.new_safe_point {
        SafePointManager::new(conn).save(point)?;
        report.safe_point_height = Some(point.block.height);
    }
    let changes = repo.replace_utxos(wallet, &utxos.target)?;
    repo.mark_addresses_used(wallet, changes.added.iter().map(|u| u.address.as_str()))?;
    report.utxos_added = changes.added.len();
    report.utxos_removed = changes.removed.len();

    for tx in history.confirmed().into_iter().chain(history.unconfirmed.iter()) {
        match repo.merge_transaction(wallet, tx)? {
            MergeOutcome::Inserted => report.transactions_inserted += 1,
            MergeOutcome::Updated if tx.state == TxState::Failed => {
                report.transactions_failed += 1
            }
            MergeOutcome::Updated => report.transactions_updated += 1,
            MergeOutcome::Replaced => report.transactions_replaced += 1,
            MergeOutcome::Unchanged | MergeOutcome::Ignored => {}
        }
        if tx.state == TxState::Successful {
            repo.mark_addresses_used(wallet, tx.addresses())?;
        }
    }
    for hash in &history.failed {
        repo.mark_failed(wallet, hash)?;
        report.transactions_failed += 1;
    }

    repo.insert_block(&tip.best_block)?;
    let mut cursor = load_cursor_tx(conn, wallet)?.unwrap_or_else(|| SyncCursor::empty(wallet.clone()));
    cursor.last_block = Some(BlockPointer::from(&tip.best_block));
    cursor.last_sync_time = now;
    cursor.utxo_block_hash = Some(utxos.reference.clone());
    cursor.history = history.cursor.clone();
    save_cursor_tx(conn, &cursor)?;

    report.blocks_released = repo.gc_blocks()?;
    Ok(report)
}
