//! UTXO phase of a sync pass
//!
//! The wallet keeps a full UTXO snapshot at a deeply confirmed block (its
//! safe point). Each pass asks the indexer for the changes since that
//! block, up to the best block, so only one full snapshot is needed per
//! safe-point interval. Addresses first recorded by a pass are folded into
//! the stored safe point by replaying their history, so widening the gap
//! window never forces a new snapshot.

use crate::client::{IndexerClient, PointResult, UtxoDiff, UtxoDiffItem};
use crate::history::HistoryPlan;
use crate::sync::{SyncEngine, WalletSnapshot};
use crate::{Error, Result};
use mirror_core::{replay_onto, BlockInfo, ChainTransaction, TipStatus, Utxo, UtxoSet};
use mirror_storage_sqlite::{normalize_utxo, UtxoSafePoint};
use std::collections::BTreeSet;

/// UTXO set a pass will materialize
#[derive(Debug, Clone)]
pub(crate) struct UtxoPlan {
    /// Full UTXO set as of `reference`
    pub target: UtxoSet,
    /// Block the set corresponds to
    pub reference: String,
    /// Snapshot to store as the wallet's new safe point
    pub new_safe_point: Option<UtxoSafePoint>,
}

impl<C: IndexerClient> SyncEngine<C> {
    pub(crate) async fn fetch_utxos(
        &self,
        snapshot: &WalletSnapshot,
        tip: &TipStatus,
        fresh: &[ChainTransaction],
    ) -> Result<UtxoPlan> {
        if snapshot.addresses.is_empty() {
            return Ok(UtxoPlan {
                target: UtxoSet::new(),
                reference: tip.best_block.hash.clone(),
                new_safe_point: None,
            });
        }

        let mut fetched_at_point = false;
        let mut new_safe_point = None;
        let stored = match &snapshot.safe_point {
            Some(point) if !snapshot.derived.is_empty() => {
                let extended = extend_safe_point(point, fresh, &snapshot.fresh_owned());
                new_safe_point = Some(extended.clone());
                Some(extended)
            }
            Some(point) => Some(point.clone()),
            None => None,
        };
        let mut base = match stored {
            None => {
                fetched_at_point = true;
                let point = self.snapshot_at(snapshot, &tip.safe_block).await?;
                new_safe_point = Some(point.clone());
                point
            }
            Some(point) if self.needs_refresh(&point, &tip.safe_block) => {
                let (point, full_fetch) = self.refresh_safe_point(snapshot, &point, tip).await?;
                fetched_at_point = full_fetch;
                new_safe_point = Some(point.clone());
                point
            }
            Some(point) => point,
        };

        let mut candidates = vec![tip.best_block.hash.clone()];
        if let Some(local) = snapshot
            .cursor
            .as_ref()
            .and_then(|c| c.utxo_block_hash.as_ref())
        {
            if *local != tip.best_block.hash {
                candidates.push(local.clone());
            }
        }

        let diff = loop {
            let result = self
                .remote(
                    "UTXO diff",
                    self.client.get_utxo_diff_since_point(
                        &snapshot.addresses,
                        &base.block.hash,
                        &candidates,
                    ),
                )
                .await?;
            match result {
                PointResult::Found(diff) => break diff,
                PointResult::Rollback if !fetched_at_point => {
                    tracing::debug!(
                        "Safe point {} of wallet {} is not canonical, taking a fresh snapshot",
                        base.block.height,
                        snapshot.wallet
                    );
                    fetched_at_point = true;
                    base = self.snapshot_at(snapshot, &tip.safe_block).await?;
                    new_safe_point = Some(base.clone());
                }
                PointResult::Rollback => {
                    return Err(Error::Rollback(format!(
                        "no diff from block {} to any of {} candidates",
                        base.block.hash,
                        candidates.len()
                    )));
                }
            }
        };

        let owned: BTreeSet<&str> = snapshot.addresses.iter().map(String::as_str).collect();
        let mut target = base.utxo_set();
        apply_diff(&mut target, &diff, &owned)?;

        Ok(UtxoPlan {
            target,
            reference: diff.new_reference,
            new_safe_point,
        })
    }

    fn needs_refresh(&self, point: &UtxoSafePoint, safe: &BlockInfo) -> bool {
        safe.height >= point.block.height.saturating_add(self.config.safe_point_interval)
            && safe.hash != point.block.hash
    }

    /// Move the safe point forward to the remote safe block, by diff when
    /// possible. Returns the new point and whether a full snapshot was taken.
    async fn refresh_safe_point(
        &self,
        snapshot: &WalletSnapshot,
        point: &UtxoSafePoint,
        tip: &TipStatus,
    ) -> Result<(UtxoSafePoint, bool)> {
        let safe = &tip.safe_block;
        let candidates = [safe.hash.clone()];
        let result = self
            .remote(
                "safe point diff",
                self.client.get_utxo_diff_since_point(
                    &snapshot.addresses,
                    &point.block.hash,
                    &candidates,
                ),
            )
            .await?;

        match result {
            PointResult::Found(diff) if diff.new_reference == safe.hash => {
                let owned: BTreeSet<&str> = snapshot.addresses.iter().map(String::as_str).collect();
                let mut set = point.utxo_set();
                apply_diff(&mut set, &diff, &owned)?;
                tracing::debug!(
                    "Advanced safe point of wallet {} from {} to {}",
                    snapshot.wallet,
                    point.block.height,
                    safe.height
                );
                Ok((
                    UtxoSafePoint {
                        wallet_id: snapshot.wallet.clone(),
                        block: safe.clone(),
                        utxos: set.into_values().collect(),
                    },
                    false,
                ))
            }
            _ => Ok((self.snapshot_at(snapshot, safe).await?, true)),
        }
    }

    /// Full UTXO snapshot at `block`, which must be canonical
    async fn snapshot_at(&self, snapshot: &WalletSnapshot, block: &BlockInfo) -> Result<UtxoSafePoint> {
        let result = self
            .remote(
                "UTXO snapshot",
                self.client.get_utxo_at_point(&snapshot.addresses, &block.hash),
            )
            .await?;
        let utxos = match result {
            PointResult::Found(utxos) => utxos,
            PointResult::Rollback => {
                return Err(Error::Rollback(format!(
                    "safe block {} at height {} is no longer canonical",
                    block.hash, block.height
                )))
            }
        };

        let owned: BTreeSet<&str> = snapshot.addresses.iter().map(String::as_str).collect();
        let mut set = UtxoSet::new();
        for utxo in utxos {
            let utxo = checked_utxo(utxo, &owned)?;
            set.insert(utxo.key(), utxo);
        }
        tracing::debug!(
            "Fetched {} UTXOs of wallet {} at height {}",
            set.len(),
            snapshot.wallet,
            block.height
        );

        Ok(UtxoSafePoint {
            wallet_id: snapshot.wallet.clone(),
            block: block.clone(),
            utxos: set.into_values().collect(),
        })
    }
}

/// Fold the outputs of addresses first recorded by a pass into a stored
/// safe point, replaying their confirmed history up to the point's block
pub(crate) fn extend_safe_point(
    point: &UtxoSafePoint,
    fresh: &[ChainTransaction],
    owned: &BTreeSet<String>,
) -> UtxoSafePoint {
    let height = point.block.height;
    let upto = fresh
        .iter()
        .filter(|tx| tx.position().map_or(false, |p| p.height <= height));
    let set = replay_onto(point.utxo_set(), upto, owned, None);
    UtxoSafePoint {
        wallet_id: point.wallet_id.clone(),
        block: point.block.clone(),
        utxos: set.into_values().collect(),
    }
}

/// UTXO set implied by merging `history` into a wallet whose stored set is
/// `current`, for passes that skip the indexer's UTXO endpoints.
///
/// Replaying a range that overlaps what `current` already reflects is
/// harmless: every re-added output is removed again by its spender.
pub(crate) fn replay_plan(
    current: UtxoSet,
    snapshot: &WalletSnapshot,
    tip: &TipStatus,
    history: &HistoryPlan,
) -> UtxoPlan {
    let fresh_owned = snapshot.fresh_owned();
    let known_owned: BTreeSet<String> = snapshot.known_addresses().into_iter().collect();
    let target = replay_onto(current, &history.known, &known_owned, None);
    let target = replay_onto(target, &history.fresh, &fresh_owned, None);

    let new_safe_point = match &snapshot.safe_point {
        Some(point) if !fresh_owned.is_empty() => {
            Some(extend_safe_point(point, &history.fresh, &fresh_owned))
        }
        _ => None,
    };
    UtxoPlan {
        target,
        reference: tip.best_block.hash.clone(),
        new_safe_point,
    }
}

/// Apply a diff to `set`: removals first, then additions
fn apply_diff(set: &mut UtxoSet, diff: &UtxoDiff, owned: &BTreeSet<&str>) -> Result<()> {
    for item in &diff.items {
        if let UtxoDiffItem::Removed(key) = item {
            if set.remove(key).is_none() {
                tracing::debug!("Diff removes unknown output {}", key);
            }
        }
    }
    for item in &diff.items {
        if let UtxoDiffItem::Added(utxo) = item {
            let utxo = checked_utxo(utxo.clone(), owned)?;
            set.insert(utxo.key(), utxo);
        }
    }
    Ok(())
}

fn checked_utxo(utxo: Utxo, owned: &BTreeSet<&str>) -> Result<Utxo> {
    if !owned.contains(utxo.address.as_str()) {
        return Err(Error::Remote(format!(
            "UTXO {} pays {}, which the wallet does not own",
            utxo.key(),
            utxo.address
        )));
    }
    normalize_utxo(&utxo).map_err(|e| Error::Remote(format!("UTXO {}: {}", utxo.key(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::{TxInput, TxOutput, TxState, UtxoKey, WalletId};

    fn utxo(tx: &str, index: u32, address: &str, amount: u64) -> Utxo {
        Utxo {
            tx_hash: tx.to_string(),
            output_index: index,
            address: address.to_string(),
            amount,
            assets: vec![],
        }
    }

    fn block(height: u64) -> BlockInfo {
        BlockInfo {
            hash: format!("b{}", height),
            height,
            epoch: 0,
            slot: height,
            time: 0,
        }
    }

    fn paid(hash: &str, height: u64, to: &str, amount: u64) -> ChainTransaction {
        ChainTransaction {
            hash: hash.to_string(),
            state: TxState::Successful,
            block: Some(block(height)),
            ordinal: Some(0),
            last_update: 0,
            inputs: vec![TxInput {
                address: "faucet".to_string(),
                tx_hash: format!("{}_src", hash),
                output_index: 0,
                amount,
                assets: vec![],
            }],
            outputs: vec![TxOutput {
                address: to.to_string(),
                amount,
                assets: vec![],
            }],
        }
    }

    #[test]
    fn test_extend_safe_point_stops_at_its_block() {
        let point = UtxoSafePoint {
            wallet_id: WalletId::new("w1"),
            block: block(5),
            utxos: vec![utxo("k", 0, "a", 5)],
        };
        let fresh = vec![paid("t1", 3, "f", 7), paid("t2", 8, "f", 9)];
        let owned: BTreeSet<String> = ["f".to_string()].into_iter().collect();

        let extended = extend_safe_point(&point, &fresh, &owned);
        assert_eq!(extended.block, point.block);
        let keys: Vec<UtxoKey> = extended.utxo_set().into_keys().collect();
        assert_eq!(keys, vec![UtxoKey::new("k", 0), UtxoKey::new("t1", 0)]);
    }

    #[test]
    fn test_apply_diff_removes_before_adding() {
        let owned: BTreeSet<&str> = ["a"].into_iter().collect();
        let mut set = UtxoSet::new();
        let old = utxo("t1", 0, "a", 5);
        set.insert(old.key(), old);

        let replacement = utxo("t1", 0, "a", 7);
        let diff = UtxoDiff {
            items: vec![
                UtxoDiffItem::Added(replacement.clone()),
                UtxoDiffItem::Removed(UtxoKey::new("t1", 0)),
            ],
            new_reference: "b1".to_string(),
        };
        apply_diff(&mut set, &diff, &owned).unwrap();
        assert_eq!(set.get(&UtxoKey::new("t1", 0)), Some(&replacement));
    }

    #[test]
    fn test_foreign_utxo_is_rejected() {
        let owned: BTreeSet<&str> = ["a"].into_iter().collect();
        let diff = UtxoDiff {
            items: vec![UtxoDiffItem::Added(utxo("t1", 0, "b", 5))],
            new_reference: "b1".to_string(),
        };
        let err = apply_diff(&mut UtxoSet::new(), &diff, &owned).unwrap_err();
        assert!(matches!(err, Error::Remote(_)));
    }
}
