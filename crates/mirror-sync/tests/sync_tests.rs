//! End-to-end sync passes against the in-memory indexer

mod common;

use async_trait::async_trait;
use common::*;
use mirror_core::{
    ChainId, ChainTransaction, HistoryCursor, TipStatus, TxState, Utxo, UtxoCapable, UtxoKey,
    WalletHandle, WalletId,
};
use mirror_storage_sqlite::{
    export_dump, get_balance, load_cursor_tx, pop_next_address, AddressCutoffManager, Database,
    DumpRow, Repository, SafePointManager,
};
use mirror_sync::{
    Error, HistoryRequest, IndexerClient, MockIndexer, PointResult, SyncConfig, SyncEngine, TxRef,
    UtxoDiff,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn engine(indexer: &Arc<MockIndexer>) -> SyncEngine<Arc<MockIndexer>> {
    SyncEngine::new(indexer.clone(), SyncConfig::default())
}

/// Chain state that should not depend on how the store got there
#[derive(Debug, PartialEq)]
struct LedgerView {
    transactions: Vec<(String, TxState, Option<String>)>,
    utxos: Vec<Utxo>,
    used: Vec<(String, bool)>,
    balance: u128,
}

fn ledger_view(db: &mut Database, wallet: &WalletId) -> LedgerView {
    let balance = get_balance(db, wallet).unwrap().default_amount();
    let repo = Repository::new(db);
    let mut transactions: Vec<_> = repo
        .list_transactions(wallet)
        .unwrap()
        .into_iter()
        .map(|tx| (tx.hash, tx.state, tx.block.map(|b| b.hash)))
        .collect();
    transactions.sort();
    LedgerView {
        transactions,
        utxos: repo.get_utxos(wallet).unwrap().into_values().collect(),
        used: repo
            .get_addresses(wallet)
            .unwrap()
            .into_iter()
            .map(|a| (a.hash, a.used))
            .collect(),
        balance,
    }
}

/// Every dumped row that belongs to `wallet`
fn wallet_rows(db: &mut Database, wallet: &str) -> BTreeMap<String, Vec<DumpRow>> {
    let dump = export_dump(db).unwrap();
    dump.tables
        .into_iter()
        .map(|(table, rows)| {
            let key = if table == "wallets" { "id" } else { "wallet_id" };
            let rows = rows
                .into_iter()
                .filter(|row| row.get(key).and_then(|v| v.as_str()) == Some(wallet))
                .collect();
            (table, rows)
        })
        .collect()
}

/// Full dump without the pass timestamps
fn stable_dump(db: &mut Database) -> mirror_storage_sqlite::StoreDump {
    let mut dump = export_dump(db).unwrap();
    for row in dump.table_mut("sync_cursors") {
        row.remove("last_sync_time");
    }
    dump
}

#[tokio::test]
async fn test_balance_after_spend_with_change() {
    let mut db = Database::open_in_memory().unwrap();
    let wallet = watch_only(&db, "w1", &["addr_a", "addr_a2"]);
    let indexer = Arc::new(MockIndexer::new());

    indexer.mine(vec![fund("t1", "addr_a", 4_000_000)]);
    indexer.mine(vec![spend(
        "t2",
        "addr_a",
        &UtxoKey::new("t1", 0),
        4_000_000,
        &[("addr_a2", 2_100_000), ("shop", 1_731_391)],
    )]);
    indexer.mine_empty(3);

    let report = engine(&indexer).sync_wallet(&mut db, &wallet).await.unwrap();
    assert_eq!(report.transactions_inserted, 2);

    let id = wallet.wallet_id().clone();
    assert_eq!(get_balance(&mut db, &id).unwrap().default_amount(), 2_100_000);

    let utxos = Repository::new(&db).get_utxos(&id).unwrap();
    assert_eq!(utxos.len(), 1);
    let only = utxos.values().next().unwrap();
    assert_eq!(only.address, "addr_a2");
    assert_eq!(only.key(), UtxoKey::new("t2", 0));
}

#[tokio::test]
async fn test_second_pass_is_idempotent() {
    let mut db = Database::open_in_memory().unwrap();
    let wallet = watch_only(&db, "w1", &["addr_a"]);
    let indexer = Arc::new(MockIndexer::new());
    indexer.mine(vec![fund("t1", "addr_a", 10)]);
    indexer.submit_pending(fund("p1", "addr_a", 3));
    indexer.mine_empty(4);

    let engine = engine(&indexer);
    engine.sync_wallet(&mut db, &wallet).await.unwrap();
    let id = wallet.wallet_id().clone();
    let before = ledger_view(&mut db, &id);

    let report = engine.sync_wallet(&mut db, &wallet).await.unwrap();
    assert!(report.is_noop(), "unexpected changes: {:?}", report);
    assert_eq!(ledger_view(&mut db, &id), before);
}

#[tokio::test]
async fn test_split_calls_are_idempotent() {
    let mut db = Database::open_in_memory().unwrap();
    let wallet = watch_only(&db, "w1", &["addr_a", "addr_b"]);
    let indexer = Arc::new(MockIndexer::new());
    indexer.mine(vec![fund("t1", "addr_a", 10)]);
    indexer.mine(vec![spend(
        "t2",
        "addr_a",
        &UtxoKey::new("t1", 0),
        10,
        &[("addr_b", 6), ("shop", 4)],
    )]);
    indexer.submit_pending(fund("p1", "addr_a", 3));
    indexer.mine_empty(4);

    let engine = engine(&indexer);
    engine.sync_utxos(&mut db, &wallet).await.unwrap();
    engine.sync_history(&mut db, &wallet).await.unwrap();
    let before = stable_dump(&mut db);

    let utxos = engine.sync_utxos(&mut db, &wallet).await.unwrap();
    assert!(utxos.is_noop(), "unexpected changes: {:?}", utxos);
    let history = engine.sync_history(&mut db, &wallet).await.unwrap();
    assert!(history.is_noop(), "unexpected changes: {:?}", history);
    assert_eq!(stable_dump(&mut db), before);
}

#[tokio::test]
async fn test_sync_utxos_commits_the_history_behind_them() {
    let mut db = Database::open_in_memory().unwrap();
    let wallet = watch_only(&db, "w1", &["addr_a"]);
    let id = wallet.wallet_id().clone();
    let indexer = Arc::new(MockIndexer::new());
    indexer.mine(vec![fund("t1", "addr_a", 100)]);
    indexer.mine_empty(4);

    let engine = engine(&indexer);
    let report = engine.sync_utxos(&mut db, &wallet).await.unwrap();
    assert_eq!(report.utxos_added, 1);
    assert_eq!(report.transactions_inserted, 1);

    let repo = Repository::new(&db);
    let t1 = repo.get_transaction(&id, "t1").unwrap().unwrap();
    assert_eq!(t1.state, TxState::Successful);
    let cursor = load_cursor_tx(db.conn(), &id).unwrap().unwrap();
    assert_eq!(cursor.history.map(|c| c.tx_hash).as_deref(), Some("t1"));
    assert_eq!(cursor.utxo_block_hash, Some(indexer.tip().hash));
    assert_eq!(get_balance(&mut db, &id).unwrap().default_amount(), 100);

    let report = engine.sync_history(&mut db, &wallet).await.unwrap();
    assert!(report.is_noop(), "unexpected changes: {:?}", report);
}

#[tokio::test]
async fn test_sync_history_replays_utxos() {
    let mut db = Database::open_in_memory().unwrap();
    let wallet = watch_only(&db, "w1", &["addr_a"]);
    let id = wallet.wallet_id().clone();
    let indexer = Arc::new(MockIndexer::new());
    indexer.mine(vec![fund("t1", "addr_a", 100)]);
    indexer.mine(vec![spend(
        "t2",
        "addr_a",
        &UtxoKey::new("t1", 0),
        100,
        &[("addr_a", 60), ("shop", 40)],
    )]);
    indexer.mine_empty(4);

    let engine = engine(&indexer);
    let report = engine.sync_history(&mut db, &wallet).await.unwrap();
    assert_eq!(report.transactions_inserted, 2);
    assert_eq!(report.utxos_added, 1);
    assert_eq!(indexer.utxo_at_point_calls(), 0);
    assert_eq!(get_balance(&mut db, &id).unwrap().default_amount(), 60);
    let utxos = Repository::new(&db).get_utxos(&id).unwrap();
    assert_eq!(utxos, indexer.utxos_at_tip(&["addr_a".to_string()]));

    // A later history-only pass spends the change
    indexer.mine(vec![spend(
        "t3",
        "addr_a",
        &UtxoKey::new("t2", 0),
        60,
        &[("shop", 55), ("addr_a", 5)],
    )]);
    indexer.mine_empty(4);
    engine.sync_history(&mut db, &wallet).await.unwrap();
    assert_eq!(indexer.utxo_at_point_calls(), 0);

    let mut fresh = Database::open_in_memory().unwrap();
    let fresh_wallet = watch_only(&fresh, "w1", &["addr_a"]);
    engine.sync_wallet(&mut fresh, &fresh_wallet).await.unwrap();
    assert_eq!(ledger_view(&mut db, &id), ledger_view(&mut fresh, &id));
    assert_eq!(get_balance(&mut db, &id).unwrap().default_amount(), 5);
}

#[tokio::test]
async fn test_pending_then_dropped_becomes_failed() {
    let mut db = Database::open_in_memory().unwrap();
    let wallet = watch_only(&db, "w1", &["addr_a"]);
    let id = wallet.wallet_id().clone();
    let indexer = Arc::new(MockIndexer::new());
    indexer.mine_empty(4);
    indexer.submit_pending(fund("p1", "addr_a", 500));

    let engine = engine(&indexer);
    engine.sync_wallet(&mut db, &wallet).await.unwrap();
    let local = Repository::new(&db).get_transaction(&id, "p1").unwrap().unwrap();
    assert_eq!(local.state, TxState::Pending);

    assert!(indexer.drop_pending("p1"));
    let report = engine.sync_wallet(&mut db, &wallet).await.unwrap();
    assert_eq!(report.transactions_failed, 1);

    let local = Repository::new(&db).get_transaction(&id, "p1").unwrap().unwrap();
    assert_eq!(local.state, TxState::Failed);
    assert_eq!(get_balance(&mut db, &id).unwrap().default_amount(), 0);
}

#[tokio::test]
async fn test_rejected_pending_is_failed_and_mined_pending_confirms() {
    let mut db = Database::open_in_memory().unwrap();
    let wallet = watch_only(&db, "w1", &["addr_a"]);
    let id = wallet.wallet_id().clone();
    let indexer = Arc::new(MockIndexer::new());
    indexer.submit_pending(fund("p1", "addr_a", 5));
    indexer.submit_pending(fund("p2", "addr_a", 7));

    let engine = engine(&indexer);
    engine.sync_history(&mut db, &wallet).await.unwrap();

    assert!(indexer.reject_pending("p1"));
    indexer.mine(vec![fund("p2", "addr_a", 7)]);
    indexer.mine_empty(3);
    let report = engine.sync_wallet(&mut db, &wallet).await.unwrap();
    assert_eq!(report.transactions_failed, 1);
    assert_eq!(report.transactions_updated, 1);

    let repo = Repository::new(&db);
    assert_eq!(repo.get_transaction(&id, "p1").unwrap().unwrap().state, TxState::Failed);
    let confirmed = repo.get_transaction(&id, "p2").unwrap().unwrap();
    assert_eq!(confirmed.state, TxState::Successful);
    assert_eq!(confirmed.block.map(|b| b.height), Some(1));
    assert_eq!(get_balance(&mut db, &id).unwrap().default_amount(), 7);
}

#[tokio::test]
async fn test_rollback_matches_fresh_sync() {
    let mut db = Database::open_in_memory().unwrap();
    let wallet = watch_only(&db, "w1", &["addr_a"]);
    let id = wallet.wallet_id().clone();
    let indexer = Arc::new(MockIndexer::new());

    indexer.mine(vec![fund("t1", "addr_a", 100)]);
    indexer.mine_empty(3);
    indexer.mine(vec![fund("t2", "addr_a", 50)]);
    indexer.mine_empty(1);

    let engine = engine(&indexer);
    engine.sync_wallet(&mut db, &wallet).await.unwrap();
    assert_eq!(get_balance(&mut db, &id).unwrap().default_amount(), 150);

    // t2's block is replaced by a fork paying t3 instead
    indexer.rollback(2);
    indexer.mine(vec![fund("t3", "addr_a", 9)]);
    indexer.mine_empty(2);

    let report = engine.sync_wallet(&mut db, &wallet).await.unwrap();
    assert_eq!(report.rollbacks, 1);
    assert!(Repository::new(&db).get_transaction(&id, "t2").unwrap().is_none());

    let mut fresh = Database::open_in_memory().unwrap();
    let fresh_wallet = watch_only(&fresh, "w1", &["addr_a"]);
    engine.sync_wallet(&mut fresh, &fresh_wallet).await.unwrap();

    assert_eq!(ledger_view(&mut db, &id), ledger_view(&mut fresh, &id));
    assert_eq!(get_balance(&mut db, &id).unwrap().default_amount(), 109);
}

#[tokio::test]
async fn test_rollback_below_safe_point_recovers() {
    let mut db = Database::open_in_memory().unwrap();
    let wallet = watch_only(&db, "w1", &["addr_a"]);
    let id = wallet.wallet_id().clone();
    let indexer = Arc::new(MockIndexer::new());

    indexer.mine(vec![fund("t1", "addr_a", 100)]);
    indexer.mine_empty(3);
    indexer.mine(vec![fund("t2", "addr_a", 50)]);
    indexer.mine_empty(1);

    let engine = engine(&indexer);
    engine.sync_wallet(&mut db, &wallet).await.unwrap();
    let stored = SafePointManager::new(db.conn()).get(&id).unwrap().unwrap();
    assert_eq!(stored.block.height, 3);

    indexer.rollback(4);
    indexer.mine_empty(5);

    let report = engine.sync_wallet(&mut db, &wallet).await.unwrap();
    assert!(report.rollbacks >= 1);

    let mut fresh = Database::open_in_memory().unwrap();
    let fresh_wallet = watch_only(&fresh, "w1", &["addr_a"]);
    engine.sync_wallet(&mut fresh, &fresh_wallet).await.unwrap();
    assert_eq!(ledger_view(&mut db, &id), ledger_view(&mut fresh, &id));
    assert_eq!(get_balance(&mut db, &id).unwrap().default_amount(), 100);
}

#[tokio::test]
async fn test_safe_point_is_reused_between_passes() {
    let mut db = Database::open_in_memory().unwrap();
    let wallet = watch_only(&db, "w1", &["addr_a"]);
    let indexer = Arc::new(MockIndexer::new());
    indexer.mine(vec![fund("t1", "addr_a", 10)]);
    indexer.mine_empty(4);

    let engine = SyncEngine::new(
        indexer.clone(),
        SyncConfig {
            safe_point_interval: 4,
            ..Default::default()
        },
    );
    let first = engine.sync_utxos(&mut db, &wallet).await.unwrap();
    assert!(first.safe_point_height.is_some());
    assert_eq!(indexer.utxo_at_point_calls(), 1);

    indexer.mine(vec![fund("t2", "addr_a", 20)]);
    let second = engine.sync_utxos(&mut db, &wallet).await.unwrap();
    assert_eq!(second.safe_point_height, None);
    assert_eq!(second.utxos_added, 1);
    assert_eq!(indexer.utxo_at_point_calls(), 1);

    // Far enough past the safe point: it moves forward by diff
    indexer.mine_empty(6);
    let third = engine.sync_utxos(&mut db, &wallet).await.unwrap();
    assert_eq!(third.safe_point_height, Some(indexer.tip().height - 3));
    assert_eq!(indexer.utxo_at_point_calls(), 1);

    let id = wallet.wallet_id().clone();
    assert_eq!(get_balance(&mut db, &id).unwrap().default_amount(), 30);
}

#[tokio::test]
async fn test_wallets_are_isolated() {
    let mut db = Database::open_in_memory().unwrap();
    let alice = watch_only(&db, "alice", &["addr_alice"]);
    let bob = watch_only(&db, "bob", &["addr_bob"]);
    let indexer = Arc::new(MockIndexer::new());

    indexer.mine(vec![fund("t1", "addr_alice", 40)]);
    indexer.mine(vec![spend(
        "t2",
        "addr_alice",
        &UtxoKey::new("t1", 0),
        40,
        &[("addr_bob", 15), ("addr_alice", 25)],
    )]);
    indexer.mine_empty(3);

    let engine = engine(&indexer);
    let bob_before = wallet_rows(&mut db, "bob");
    engine.sync_wallet(&mut db, &alice).await.unwrap();
    assert_eq!(wallet_rows(&mut db, "bob"), bob_before);

    let bob_id = bob.wallet_id().clone();
    assert_eq!(get_balance(&mut db, &bob_id).unwrap().default_amount(), 0);

    let alice_before = wallet_rows(&mut db, "alice");
    engine.sync_wallet(&mut db, &bob).await.unwrap();
    assert_eq!(wallet_rows(&mut db, "alice"), alice_before);

    let alice_id = alice.wallet_id().clone();
    assert_eq!(get_balance(&mut db, &alice_id).unwrap().default_amount(), 25);
    assert_eq!(get_balance(&mut db, &bob_id).unwrap().default_amount(), 15);

    // The shared transaction is recorded once per wallet
    let repo = Repository::new(&db);
    assert!(repo.get_transaction(&alice_id, "t2").unwrap().is_some());
    assert!(repo.get_transaction(&bob_id, "t2").unwrap().is_some());
    assert!(repo.get_transaction(&bob_id, "t1").unwrap().is_none());

    // Bob's rewind after a reorg leaves every row of alice in place
    indexer.rollback(4);
    indexer.mine(vec![fund("t3", "addr_bob", 9)]);
    indexer.mine_empty(3);
    let report = engine.sync_wallet(&mut db, &bob).await.unwrap();
    assert!(report.rollbacks >= 1);
    assert_eq!(get_balance(&mut db, &bob_id).unwrap().default_amount(), 9);
    assert_eq!(wallet_rows(&mut db, "alice"), alice_before);
}

#[tokio::test]
async fn test_gap_window_follows_used_addresses() {
    let mut db = Database::open_in_memory().unwrap();
    let wallet = hd_watch(&db, "hd", 3);
    let id = wallet.wallet_id().clone();
    let cutoff = wallet.as_cutoff().unwrap();
    let indexer = Arc::new(MockIndexer::new());

    let first = pop_next_address(&mut db, cutoff, ChainId::External).unwrap();
    assert_eq!(first.derivation_index, Some(0));

    indexer.mine(vec![fund("t1", &hd_address("hd", 2), 5)]);
    indexer.mine(vec![fund("t2", &hd_address("hd", 5), 6)]);
    indexer.mine_empty(3);

    engine(&indexer).sync_wallet(&mut db, &wallet).await.unwrap();
    assert_eq!(get_balance(&mut db, &id).unwrap().default_amount(), 11);

    let repo = Repository::new(&db);
    assert_eq!(repo.highest_used_index(&id, ChainId::External).unwrap(), Some(5));
    let external = repo
        .get_addresses(&id)
        .unwrap()
        .into_iter()
        .filter(|a| a.chain == Some(ChainId::External))
        .count();
    assert_eq!(external, 9);

    let manager = AddressCutoffManager::new(db.conn());
    assert_eq!(manager.get_cutoff(&id, ChainId::External).unwrap(), Some(0));

    // Used addresses are never handed out again
    let next = pop_next_address(&mut db, cutoff, ChainId::External).unwrap();
    assert_eq!(next.derivation_index, Some(6));
    let manager = AddressCutoffManager::new(db.conn());
    assert_eq!(manager.get_cutoff(&id, ChainId::External).unwrap(), Some(6));
}

#[tokio::test]
async fn test_window_growth_reuses_cursor_and_safe_point() {
    let mut db = Database::open_in_memory().unwrap();
    let wallet = hd_watch(&db, "hd", 3);
    let id = wallet.wallet_id().clone();
    let cutoff = wallet.as_cutoff().unwrap();
    let indexer = Arc::new(MockIndexer::new());
    pop_next_address(&mut db, cutoff, ChainId::External).unwrap();

    for i in 0..25 {
        indexer.mine(vec![fund(&format!("t{}", i), &hd_address("hd", 0), 1)]);
    }
    indexer.mine_empty(4);

    let engine = SyncEngine::new(
        indexer.clone(),
        SyncConfig {
            history_page_size: 10,
            ..Default::default()
        },
    );
    engine.sync_wallet(&mut db, &wallet).await.unwrap();
    assert_eq!(get_balance(&mut db, &id).unwrap().default_amount(), 25);
    let snapshots = indexer.utxo_at_point_calls();
    let pages = indexer.history_calls();

    // A payment to an unused window address widens the window by two
    indexer.mine(vec![fund("late", &hd_address("hd", 2), 100)]);
    indexer.mine_empty(4);
    let report = engine.sync_wallet(&mut db, &wallet).await.unwrap();
    assert_eq!(report.addresses_derived, 2);
    assert_eq!(report.transactions_inserted, 1);

    assert_eq!(indexer.utxo_at_point_calls(), snapshots);
    // one page per pass for the known range, one for the new addresses
    assert_eq!(indexer.history_calls() - pages, 3);

    assert_eq!(get_balance(&mut db, &id).unwrap().default_amount(), 125);
    let addresses: Vec<String> = Repository::new(&db)
        .address_set(&id)
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(
        Repository::new(&db).get_utxos(&id).unwrap(),
        indexer.utxos_at_tip(&addresses)
    );
}

#[tokio::test]
async fn test_unavailable_remote_leaves_store_untouched() {
    let mut db = Database::open_in_memory().unwrap();
    let wallet = watch_only(&db, "w1", &["addr_a"]);
    let indexer = Arc::new(MockIndexer::new());
    indexer.mine(vec![fund("t1", "addr_a", 10)]);
    indexer.set_unavailable(true);

    let before = export_dump(&mut db).unwrap();
    let err = engine(&indexer).sync_wallet(&mut db, &wallet).await.unwrap_err();
    assert!(matches!(err, Error::RemoteUnavailable(_)));
    assert!(err.is_transient());
    assert_eq!(export_dump(&mut db).unwrap(), before);
}

#[tokio::test]
async fn test_unknown_wallet_is_rejected() {
    let mut db = Database::open_in_memory().unwrap();
    let indexer = Arc::new(MockIndexer::new());
    let ghost = WalletHandle::WatchOnly(mirror_core::WatchOnlyWallet::new(WalletId::new("ghost")));
    let err = engine(&indexer).sync_wallet(&mut db, &ghost).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Storage(mirror_storage_sqlite::Error::NotFound(_))
    ));
}

/// Delegates to the mock, stalling history pages
struct StallingIndexer {
    inner: Arc<MockIndexer>,
}

#[async_trait]
impl IndexerClient for StallingIndexer {
    async fn get_tip_status(&self) -> mirror_sync::Result<TipStatus> {
        self.inner.get_tip_status().await
    }

    async fn get_utxo_at_point(
        &self,
        addresses: &[String],
        reference: &str,
    ) -> mirror_sync::Result<PointResult<Vec<Utxo>>> {
        self.inner.get_utxo_at_point(addresses, reference).await
    }

    async fn get_utxo_diff_since_point(
        &self,
        addresses: &[String],
        since: &str,
        candidates: &[String],
    ) -> mirror_sync::Result<PointResult<UtxoDiff>> {
        self.inner
            .get_utxo_diff_since_point(addresses, since, candidates)
            .await
    }

    async fn get_history(
        &self,
        request: &HistoryRequest,
    ) -> mirror_sync::Result<PointResult<Vec<ChainTransaction>>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        self.inner.get_history(request).await
    }

    async fn get_recent_transaction_hashes(
        &self,
        addresses: &[String],
        before: Option<&HistoryCursor>,
    ) -> mirror_sync::Result<BTreeMap<String, Vec<TxRef>>> {
        self.inner.get_recent_transaction_hashes(addresses, before).await
    }

    async fn get_transactions_by_hashes(
        &self,
        hashes: &[String],
    ) -> mirror_sync::Result<BTreeMap<String, ChainTransaction>> {
        self.inner.get_transactions_by_hashes(hashes).await
    }
}

#[tokio::test]
async fn test_cancelled_pass_commits_nothing() {
    let mut db = Database::open_in_memory().unwrap();
    let wallet = watch_only(&db, "w1", &["addr_a"]);
    let indexer = Arc::new(MockIndexer::new());
    indexer.mine(vec![fund("t1", "addr_a", 10)]);
    indexer.mine_empty(4);

    let engine = SyncEngine::new(
        StallingIndexer {
            inner: indexer.clone(),
        },
        SyncConfig::default(),
    );
    let token = engine.cancel_token();
    let before = export_dump(&mut db).unwrap();

    let (result, _) = tokio::join!(engine.sync_wallet(&mut db, &wallet), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(export_dump(&mut db).unwrap(), before);
}

#[tokio::test]
async fn test_slow_remote_times_out() {
    let mut db = Database::open_in_memory().unwrap();
    let wallet = watch_only(&db, "w1", &["addr_a"]);
    let indexer = Arc::new(MockIndexer::new());

    let engine = SyncEngine::new(
        StallingIndexer { inner: indexer },
        SyncConfig {
            remote_timeout: Duration::from_millis(50),
            ..Default::default()
        },
    );
    let err = engine.sync_history(&mut db, &wallet).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_store_on_disk_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mirror.db");
    let indexer = Arc::new(MockIndexer::new());
    indexer.mine(vec![fund("t1", "addr_a", 42)]);
    indexer.mine_empty(3);

    {
        let mut db = Database::open(&path).unwrap();
        let wallet = watch_only(&db, "w1", &["addr_a"]);
        engine(&indexer).sync_wallet(&mut db, &wallet).await.unwrap();
    }

    let mut db = Database::open(&path).unwrap();
    let id = WalletId::new("w1");
    assert_eq!(get_balance(&mut db, &id).unwrap().default_amount(), 42);
    let wallet = WalletHandle::WatchOnly(mirror_core::WatchOnlyWallet::new(id));
    let report = engine(&indexer).sync_wallet(&mut db, &wallet).await.unwrap();
    assert!(report.is_noop());
}
