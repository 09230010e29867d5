//! Property tests: a synced store agrees with replaying its own history
//!
//! Random chains of payments, spends, empty blocks and shallow rollbacks are
//! built on the in-memory indexer with sync passes interleaved. After a
//! final pass the materialized UTXO set must equal both the indexer's set
//! at the tip and a replay of the stored confirmed transactions.

mod common;

use common::{fund, spend, watch_only};
use mirror_core::{replay_utxos, TxState, UtxoCapable};
use mirror_storage_sqlite::{get_balance, Database, Repository};
use mirror_sync::{MockIndexer, SyncConfig, SyncEngine};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

const ADDRESSES: [&str; 2] = ["prop_a", "prop_b"];

#[derive(Debug, Clone)]
enum Op {
    Fund { to: usize, amount: u64 },
    Spend { pick: usize, keep: u64, to: usize },
    Empty,
    Rollback(u64),
    Sync,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..ADDRESSES.len(), 1_000u64..5_000_000).prop_map(|(to, amount)| Op::Fund { to, amount }),
        3 => (any::<usize>(), 1u64..1_000, 0..ADDRESSES.len())
            .prop_map(|(pick, keep, to)| Op::Spend { pick, keep, to }),
        1 => Just(Op::Empty),
        1 => (1u64..=2).prop_map(Op::Rollback),
        2 => Just(Op::Sync),
    ]
}

fn run_ops(ops: Vec<Op>, page_size: usize) -> Result<(), TestCaseError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let mut db = Database::open_in_memory().unwrap();
        let wallet = watch_only(&db, "prop", &ADDRESSES);
        let id = wallet.wallet_id().clone();
        let owned: Vec<String> = ADDRESSES.iter().map(|a| a.to_string()).collect();
        let indexer = Arc::new(MockIndexer::new());
        let engine = SyncEngine::new(
            indexer.clone(),
            SyncConfig {
                history_page_size: page_size,
                safe_point_interval: 4,
                ..Default::default()
            },
        );

        for (n, op) in ops.into_iter().enumerate() {
            let hash = format!("tx{}", n);
            match op {
                Op::Fund { to, amount } => {
                    indexer.mine(vec![fund(&hash, ADDRESSES[to], amount)]);
                }
                Op::Spend { pick, keep, to } => {
                    let available: Vec<_> = indexer.utxos_at_tip(&owned).into_values().collect();
                    if available.is_empty() {
                        indexer.mine_empty(1);
                        continue;
                    }
                    let spent = &available[pick % available.len()];
                    let kept = keep.min(spent.amount.saturating_sub(1));
                    indexer.mine(vec![spend(
                        &hash,
                        &spent.address,
                        &spent.key(),
                        spent.amount,
                        &[(ADDRESSES[to], kept), ("elsewhere", spent.amount - kept)],
                    )]);
                }
                Op::Empty => {
                    indexer.mine_empty(1);
                }
                Op::Rollback(k) => {
                    indexer.rollback(k);
                }
                Op::Sync => {
                    engine.sync_wallet(&mut db, &wallet).await.unwrap();
                }
            }
        }

        indexer.mine_empty(4);
        engine.sync_wallet(&mut db, &wallet).await.unwrap();

        let repo = Repository::new(&db);
        let local = repo.get_utxos(&id).unwrap();
        prop_assert_eq!(&local, &indexer.utxos_at_tip(&owned));

        let owned_set: BTreeSet<String> = owned.iter().cloned().collect();
        let history = repo.list_transactions(&id).unwrap();
        prop_assert!(history.iter().all(|tx| tx.state == TxState::Successful));
        prop_assert_eq!(&replay_utxos(history.iter(), &owned_set), &local);

        let expected: u128 = local.values().map(|u| u.amount as u128).sum();
        prop_assert_eq!(get_balance(&mut db, &id).unwrap().default_amount(), expected);
        Ok(())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: the store matches the indexer and its own replayed history
    #[test]
    fn prop_sync_matches_replay(ops in prop::collection::vec(op_strategy(), 1..40)) {
        run_ops(ops, 50)?;
    }

    /// Property: small history pages give the same result as one large page
    #[test]
    fn prop_paging_does_not_change_result(ops in prop::collection::vec(op_strategy(), 1..25)) {
        run_ops(ops, 1)?;
    }
}
