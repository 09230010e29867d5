//! UTXO set reconstruction from confirmed history
//!
//! Replays `Successful` transactions in `(height, ordinal)` order, spending
//! inputs and creating outputs owned by a given address set. The result is
//! what the materialized UTXO set of a wallet must equal.

use crate::{ChainTransaction, TxPosition, TxState, Utxo, UtxoKey};
use std::collections::{BTreeMap, BTreeSet};

/// UTXO set keyed by output reference
pub type UtxoSet = BTreeMap<UtxoKey, Utxo>;

/// Replay confirmed transactions from an empty set
pub fn replay_utxos<'a, I>(transactions: I, owned: &BTreeSet<String>) -> UtxoSet
where
    I: IntoIterator<Item = &'a ChainTransaction>,
{
    replay_onto(UtxoSet::new(), transactions, owned, None)
}

/// Replay confirmed transactions onto `base`, skipping those at or before
/// `after`.
pub fn replay_onto<'a, I>(
    mut base: UtxoSet,
    transactions: I,
    owned: &BTreeSet<String>,
    after: Option<TxPosition>,
) -> UtxoSet
where
    I: IntoIterator<Item = &'a ChainTransaction>,
{
    let mut confirmed: Vec<(TxPosition, &ChainTransaction)> = transactions
        .into_iter()
        .filter(|tx| tx.state == TxState::Successful)
        .filter_map(|tx| tx.position().map(|pos| (pos, tx)))
        .filter(|(pos, _)| after.map_or(true, |a| *pos > a))
        .collect();
    confirmed.sort_by(|a, b| a.0.cmp(&b.0));

    for (_, tx) in confirmed {
        apply_transaction(&mut base, tx, owned);
    }
    base
}

/// Apply one confirmed transaction to a UTXO set
pub fn apply_transaction(set: &mut UtxoSet, tx: &ChainTransaction, owned: &BTreeSet<String>) {
    for input in &tx.inputs {
        set.remove(&UtxoKey::new(input.tx_hash.clone(), input.output_index));
    }
    for (index, output) in tx.outputs.iter().enumerate() {
        if !owned.contains(&output.address) {
            continue;
        }
        let utxo = Utxo {
            tx_hash: tx.hash.clone(),
            output_index: index as u32,
            address: output.address.clone(),
            amount: output.amount,
            assets: output.assets.clone(),
        };
        set.insert(utxo.key(), utxo);
    }
}
