//! In-memory indexer for tests
//!
//! Simulates a canonical chain with a mempool, re-orgs of the last `k`
//! blocks, a configurable safe depth and an outage switch. Answers follow
//! the same anchoring rules as a real indexer.

use crate::client::{HistoryRequest, IndexerClient, PointResult, TxRef, UtxoDiff, UtxoDiffItem};
use crate::{Error, Result};
use async_trait::async_trait;
use mirror_core::{
    replay_utxos, BlockInfo, ChainTransaction, HistoryCursor, TipStatus, TxPosition, TxState,
    Utxo, UtxoSet,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Default number of confirmations before a block counts as safe
pub const DEFAULT_SAFE_DEPTH: u64 = 3;

/// Maximum references returned per address by the recent-hashes call
pub const RECENT_LIMIT: usize = 50;

/// Slots between consecutive mock blocks
const SLOTS_PER_BLOCK: u64 = 20;

/// Slots per epoch
const SLOTS_PER_EPOCH: u64 = 432_000;

struct MockBlock {
    info: BlockInfo,
    transactions: Vec<ChainTransaction>,
}

struct MockChain {
    blocks: Vec<MockBlock>,
    mempool: Vec<ChainTransaction>,
    failed: Vec<ChainTransaction>,
    safe_depth: u64,
    unavailable: bool,
    nonce: u64,
    utxo_at_point_calls: usize,
    history_calls: usize,
}

/// In-memory indexer simulator
pub struct MockIndexer {
    chain: Mutex<MockChain>,
}

impl MockIndexer {
    /// Chain holding only a genesis block
    pub fn new() -> Self {
        let genesis = BlockInfo {
            hash: block_hash("", 0, 0),
            height: 0,
            epoch: 0,
            slot: 0,
            time: 0,
        };
        Self {
            chain: Mutex::new(MockChain {
                blocks: vec![MockBlock {
                    info: genesis,
                    transactions: Vec::new(),
                }],
                mempool: Vec::new(),
                failed: Vec::new(),
                safe_depth: DEFAULT_SAFE_DEPTH,
                unavailable: false,
                nonce: 1,
                utxo_at_point_calls: 0,
                history_calls: 0,
            }),
        }
    }

    /// Mine a block containing `transactions` in order.
    ///
    /// Block and ordinal are assigned here, and mined hashes leave the
    /// mempool.
    pub fn mine(&self, transactions: Vec<ChainTransaction>) -> BlockInfo {
        let mut chain = self.chain.lock();
        let parent = chain.tip().clone();
        let height = parent.height + 1;
        let slot = parent.slot + SLOTS_PER_BLOCK;
        let info = BlockInfo {
            hash: block_hash(&parent.hash, height, chain.nonce),
            height,
            epoch: slot / SLOTS_PER_EPOCH,
            slot,
            time: 1_600_000_000 + slot as i64,
        };
        chain.nonce += 1;

        let transactions: Vec<ChainTransaction> = transactions
            .into_iter()
            .enumerate()
            .map(|(ordinal, mut tx)| {
                tx.state = TxState::Successful;
                tx.block = Some(info.clone());
                tx.ordinal = Some(ordinal as u32);
                tx.last_update = info.time;
                tx
            })
            .collect();

        let mined: BTreeSet<&str> = transactions.iter().map(|tx| tx.hash.as_str()).collect();
        chain.mempool.retain(|tx| !mined.contains(tx.hash.as_str()));
        chain.failed.retain(|tx| !mined.contains(tx.hash.as_str()));

        chain.blocks.push(MockBlock {
            info: info.clone(),
            transactions,
        });
        info
    }

    /// Mine `count` empty blocks, returning the new tip
    pub fn mine_empty(&self, count: u64) -> BlockInfo {
        let mut tip = self.tip();
        for _ in 0..count {
            tip = self.mine(Vec::new());
        }
        tip
    }

    /// Put a transaction into the mempool
    pub fn submit_pending(&self, mut tx: ChainTransaction) {
        tx.state = TxState::Pending;
        tx.block = None;
        tx.ordinal = None;
        let mut chain = self.chain.lock();
        chain.mempool.retain(|p| p.hash != tx.hash);
        chain.mempool.push(tx);
    }

    /// Drop a mempool transaction without trace
    pub fn drop_pending(&self, hash: &str) -> bool {
        let mut chain = self.chain.lock();
        let before = chain.mempool.len();
        chain.mempool.retain(|tx| tx.hash != hash);
        chain.mempool.len() != before
    }

    /// Move a mempool transaction to the failed list
    pub fn reject_pending(&self, hash: &str) -> bool {
        let mut chain = self.chain.lock();
        let Some(pos) = chain.mempool.iter().position(|tx| tx.hash == hash) else {
            return false;
        };
        let mut tx = chain.mempool.remove(pos);
        tx.state = TxState::Failed;
        chain.failed.push(tx);
        true
    }

    /// Discard the last `k` blocks (never the genesis block)
    pub fn rollback(&self, k: u64) -> BlockInfo {
        let mut chain = self.chain.lock();
        let keep = chain.blocks.len().saturating_sub(k as usize).max(1);
        chain.blocks.truncate(keep);
        chain.tip().clone()
    }

    /// Confirmations a block needs before it is reported as safe
    pub fn set_safe_depth(&self, depth: u64) {
        self.chain.lock().safe_depth = depth;
    }

    /// Make every call fail with `RemoteUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.chain.lock().unavailable = unavailable;
    }

    /// Current best block
    pub fn tip(&self) -> BlockInfo {
        self.chain.lock().tip().clone()
    }

    /// Number of UTXO-at-point calls served
    pub fn utxo_at_point_calls(&self) -> usize {
        self.chain.lock().utxo_at_point_calls
    }

    /// Number of history pages served
    pub fn history_calls(&self) -> usize {
        self.chain.lock().history_calls
    }

    /// UTXO set of `addresses` at the current tip, computed by replay
    pub fn utxos_at_tip(&self, addresses: &[String]) -> UtxoSet {
        let chain = self.chain.lock();
        let tip = chain.tip().height;
        chain.utxos_at(addresses, tip)
    }
}

impl Default for MockIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    fn tip(&self) -> &BlockInfo {
        // genesis is never removed
        &self.blocks[self.blocks.len() - 1].info
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(Error::RemoteUnavailable("mock indexer is offline".to_string()));
        }
        Ok(())
    }

    fn canonical(&self, hash: &str) -> Option<&BlockInfo> {
        self.blocks
            .iter()
            .map(|b| &b.info)
            .find(|info| info.hash == hash)
    }

    fn confirmed(&self) -> impl Iterator<Item = &ChainTransaction> {
        self.blocks.iter().flat_map(|b| b.transactions.iter())
    }

    fn utxos_at(&self, addresses: &[String], height: u64) -> UtxoSet {
        let owned: BTreeSet<String> = addresses.iter().cloned().collect();
        replay_utxos(
            self.blocks
                .iter()
                .filter(|b| b.info.height <= height)
                .flat_map(|b| b.transactions.iter()),
            &owned,
        )
    }

    fn cursor_position(&self, cursor: &HistoryCursor) -> Option<TxPosition> {
        self.canonical(&cursor.block_hash)?;
        self.confirmed()
            .find(|tx| {
                tx.hash == cursor.tx_hash
                    && tx.block.as_ref().map(|b| b.hash.as_str()) == Some(cursor.block_hash.as_str())
            })
            .and_then(ChainTransaction::position)
    }
}

#[async_trait]
impl IndexerClient for MockIndexer {
    async fn get_tip_status(&self) -> Result<TipStatus> {
        let chain = self.chain.lock();
        chain.check_available()?;
        let best = chain.tip().clone();
        let safe_height = best.height.saturating_sub(chain.safe_depth);
        let safe = chain
            .blocks
            .iter()
            .map(|b| &b.info)
            .find(|info| info.height == safe_height)
            .cloned()
            .unwrap_or_else(|| best.clone());
        Ok(TipStatus {
            best_block: best,
            safe_block: safe,
        })
    }

    async fn get_utxo_at_point(
        &self,
        addresses: &[String],
        reference: &str,
    ) -> Result<PointResult<Vec<Utxo>>> {
        let mut chain = self.chain.lock();
        chain.check_available()?;
        chain.utxo_at_point_calls += 1;
        let Some(height) = chain.canonical(reference).map(|b| b.height) else {
            return Ok(PointResult::Rollback);
        };
        Ok(PointResult::Found(
            chain.utxos_at(addresses, height).into_values().collect(),
        ))
    }

    async fn get_utxo_diff_since_point(
        &self,
        addresses: &[String],
        since: &str,
        candidates: &[String],
    ) -> Result<PointResult<UtxoDiff>> {
        let chain = self.chain.lock();
        chain.check_available()?;
        let Some(since_height) = chain.canonical(since).map(|b| b.height) else {
            return Ok(PointResult::Rollback);
        };
        let Some(reference) = candidates
            .iter()
            .find_map(|hash| chain.canonical(hash))
            .cloned()
        else {
            return Ok(PointResult::Rollback);
        };

        let before = chain.utxos_at(addresses, since_height);
        let after = chain.utxos_at(addresses, reference.height);

        let mut items: Vec<UtxoDiffItem> = before
            .keys()
            .filter(|key| !after.contains_key(key))
            .cloned()
            .map(UtxoDiffItem::Removed)
            .collect();
        items.extend(
            after
                .into_iter()
                .filter(|(key, _)| !before.contains_key(key))
                .map(|(_, utxo)| UtxoDiffItem::Added(utxo)),
        );

        Ok(PointResult::Found(UtxoDiff {
            items,
            new_reference: reference.hash,
        }))
    }

    async fn get_history(
        &self,
        request: &HistoryRequest,
    ) -> Result<PointResult<Vec<ChainTransaction>>> {
        let mut chain = self.chain.lock();
        chain.check_available()?;
        chain.history_calls += 1;

        let Some(until) = chain.canonical(&request.until_block).map(|b| b.height) else {
            return Ok(PointResult::Rollback);
        };
        let after = match &request.after {
            Some(cursor) => match chain.cursor_position(cursor) {
                Some(position) => Some(position),
                None => return Ok(PointResult::Rollback),
            },
            None => None,
        };

        let owned: BTreeSet<String> = request.addresses.iter().cloned().collect();
        let mut page: Vec<ChainTransaction> = chain
            .confirmed()
            .filter(|tx| tx.touches(&owned))
            .filter(|tx| {
                tx.position().map_or(false, |pos| {
                    pos.height <= until && after.map_or(true, |a| pos > a)
                })
            })
            .take(request.limit)
            .cloned()
            .collect();

        page.extend(
            chain
                .mempool
                .iter()
                .chain(chain.failed.iter())
                .filter(|tx| tx.touches(&owned))
                .cloned(),
        );
        Ok(PointResult::Found(page))
    }

    async fn get_recent_transaction_hashes(
        &self,
        addresses: &[String],
        before: Option<&HistoryCursor>,
    ) -> Result<BTreeMap<String, Vec<TxRef>>> {
        let chain = self.chain.lock();
        chain.check_available()?;
        let before = match before {
            Some(cursor) => Some(chain.cursor_position(cursor).ok_or_else(|| {
                Error::Remote(format!("unknown cursor transaction {}", cursor.tx_hash))
            })?),
            None => None,
        };

        let mut result = BTreeMap::new();
        for address in addresses {
            let single: BTreeSet<String> = [address.clone()].into_iter().collect();
            let mut refs: Vec<TxRef> = Vec::new();
            if before.is_none() {
                refs.extend(chain.mempool.iter().filter(|tx| tx.touches(&single)).map(|tx| {
                    TxRef {
                        tx_hash: tx.hash.clone(),
                        block_hash: None,
                        height: None,
                    }
                }));
            }
            let mut confirmed: Vec<&ChainTransaction> = chain
                .confirmed()
                .filter(|tx| tx.touches(&single))
                .filter(|tx| {
                    tx.position()
                        .map_or(false, |pos| before.map_or(true, |b| pos < b))
                })
                .collect();
            confirmed.reverse();
            refs.extend(confirmed.into_iter().map(|tx| TxRef {
                tx_hash: tx.hash.clone(),
                block_hash: tx.block.as_ref().map(|b| b.hash.clone()),
                height: tx.block.as_ref().map(|b| b.height),
            }));
            refs.truncate(RECENT_LIMIT);
            if !refs.is_empty() {
                result.insert(address.clone(), refs);
            }
        }
        Ok(result)
    }

    async fn get_transactions_by_hashes(
        &self,
        hashes: &[String],
    ) -> Result<BTreeMap<String, ChainTransaction>> {
        let chain = self.chain.lock();
        chain.check_available()?;
        let wanted: BTreeSet<&str> = hashes.iter().map(String::as_str).collect();
        Ok(chain
            .confirmed()
            .chain(chain.mempool.iter())
            .chain(chain.failed.iter())
            .filter(|tx| wanted.contains(tx.hash.as_str()))
            .map(|tx| (tx.hash.clone(), tx.clone()))
            .collect())
    }
}

fn block_hash(parent: &str, height: u64, nonce: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent.as_bytes());
    hasher.update(height.to_be_bytes());
    hasher.update(nonce.to_be_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::TxOutput;

    fn pay(hash: &str, address: &str, amount: u64) -> ChainTransaction {
        ChainTransaction {
            hash: hash.to_string(),
            state: TxState::Pending,
            block: None,
            ordinal: None,
            last_update: 0,
            inputs: vec![],
            outputs: vec![TxOutput {
                address: address.to_string(),
                amount,
                assets: vec![],
            }],
        }
    }

    #[tokio::test]
    async fn test_rollback_replaces_hashes() {
        let mock = MockIndexer::new();
        let first = mock.mine(vec![pay("t1", "a", 1)]);
        mock.rollback(1);
        let second = mock.mine(vec![]);
        assert_eq!(first.height, second.height);
        assert_ne!(first.hash, second.hash);

        let addresses = vec!["a".to_string()];
        let stale = mock
            .get_utxo_at_point(&addresses, &first.hash)
            .await
            .unwrap();
        assert_eq!(stale, PointResult::Rollback);
    }

    #[tokio::test]
    async fn test_diff_runs_to_first_canonical_candidate() {
        let mock = MockIndexer::new();
        let genesis = mock.tip();
        mock.mine(vec![pay("t1", "a", 5)]);
        let tip = mock.tip();

        let addresses = vec!["a".to_string()];
        let diff = mock
            .get_utxo_diff_since_point(
                &addresses,
                &genesis.hash,
                &["unknown".to_string(), tip.hash.clone()],
            )
            .await
            .unwrap()
            .found()
            .unwrap();
        assert_eq!(diff.new_reference, tip.hash);
        assert_eq!(diff.items.len(), 1);
    }

    #[tokio::test]
    async fn test_safe_block_lags_tip() {
        let mock = MockIndexer::new();
        mock.set_safe_depth(2);
        mock.mine_empty(5);
        let status = mock.get_tip_status().await.unwrap();
        assert_eq!(status.best_block.height, 5);
        assert_eq!(status.safe_block.height, 3);
    }

    #[tokio::test]
    async fn test_history_pages_and_mempool() {
        let mock = MockIndexer::new();
        for i in 0..3 {
            mock.mine(vec![pay(&format!("t{}", i), "a", 1)]);
        }
        mock.submit_pending(pay("p", "a", 1));

        let tip = mock.tip();
        let request = HistoryRequest {
            addresses: vec!["a".to_string()],
            until_block: tip.hash.clone(),
            after: None,
            limit: 2,
        };
        let page = mock.get_history(&request).await.unwrap().found().unwrap();
        let hashes: Vec<&str> = page.iter().map(|tx| tx.hash.as_str()).collect();
        assert_eq!(hashes, vec!["t0", "t1", "p"]);
    }

    #[tokio::test]
    async fn test_unavailable_switch() {
        let mock = MockIndexer::new();
        mock.set_unavailable(true);
        assert!(matches!(
            mock.get_tip_status().await,
            Err(Error::RemoteUnavailable(_))
        ));
    }
}
