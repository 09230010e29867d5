//! Remote indexer client interface
//!
//! The indexer is queried through idempotent calls only. Calls anchored at
//! a block (or a history cursor) answer [`PointResult::Rollback`] when the
//! anchor is no longer on the remote's canonical chain.

use crate::Result;
use async_trait::async_trait;
use mirror_core::{BlockInfo, ChainTransaction, HistoryCursor, TipStatus, Utxo, UtxoKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Answer to a call anchored at a block or cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointResult<T> {
    /// The anchor is canonical
    Found(T),
    /// The anchor is unknown to, or was rolled back by, the remote
    Rollback,
}

impl<T> PointResult<T> {
    /// Convert to an option, `None` on rollback
    pub fn found(self) -> Option<T> {
        match self {
            PointResult::Found(value) => Some(value),
            PointResult::Rollback => None,
        }
    }
}

/// One change to a UTXO set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UtxoDiffItem {
    /// Output created
    Added(Utxo),
    /// Output spent
    Removed(UtxoKey),
}

/// UTXO changes between two blocks
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UtxoDiff {
    /// Changes, removals listed before additions
    pub items: Vec<UtxoDiffItem>,
    /// Hash of the candidate block the diff runs to
    pub new_reference: String,
}

/// History page request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    /// Wallet addresses
    pub addresses: Vec<String>,
    /// Last block included in the page range
    pub until_block: String,
    /// Exclusive start of the range; `None` for genesis
    pub after: Option<HistoryCursor>,
    /// Maximum confirmed transactions per page
    pub limit: usize,
}

/// Reference to a transaction touching an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRef {
    /// Transaction hash
    pub tx_hash: String,
    /// Containing block, `None` while in the mempool
    pub block_hash: Option<String>,
    /// Block height, `None` while in the mempool
    pub height: Option<u64>,
}

/// Remote indexer client
#[async_trait]
pub trait IndexerClient: Send + Sync {
    /// Current best block and the deepest block treated as final
    async fn get_tip_status(&self) -> Result<TipStatus>;

    /// Current best block
    async fn get_best_block(&self) -> Result<BlockInfo> {
        Ok(self.get_tip_status().await?.best_block)
    }

    /// Full UTXO set of `addresses` as of `reference`
    async fn get_utxo_at_point(
        &self,
        addresses: &[String],
        reference: &str,
    ) -> Result<PointResult<Vec<Utxo>>>;

    /// UTXO changes of `addresses` from `since` to the first of
    /// `candidates` that is canonical
    async fn get_utxo_diff_since_point(
        &self,
        addresses: &[String],
        since: &str,
        candidates: &[String],
    ) -> Result<PointResult<UtxoDiff>>;

    /// Confirmed transactions after the request cursor up to `until_block`,
    /// plus every pending or failed transaction touching the addresses
    async fn get_history(&self, request: &HistoryRequest)
        -> Result<PointResult<Vec<ChainTransaction>>>;

    /// Most recent transactions per address, newest first
    async fn get_recent_transaction_hashes(
        &self,
        addresses: &[String],
        before: Option<&HistoryCursor>,
    ) -> Result<BTreeMap<String, Vec<TxRef>>>;

    /// Look up transactions; unknown hashes are absent from the result
    async fn get_transactions_by_hashes(
        &self,
        hashes: &[String],
    ) -> Result<BTreeMap<String, ChainTransaction>>;
}

#[async_trait]
impl<T: IndexerClient + ?Sized> IndexerClient for Arc<T> {
    async fn get_tip_status(&self) -> Result<TipStatus> {
        (**self).get_tip_status().await
    }

    async fn get_utxo_at_point(
        &self,
        addresses: &[String],
        reference: &str,
    ) -> Result<PointResult<Vec<Utxo>>> {
        (**self).get_utxo_at_point(addresses, reference).await
    }

    async fn get_utxo_diff_since_point(
        &self,
        addresses: &[String],
        since: &str,
        candidates: &[String],
    ) -> Result<PointResult<UtxoDiff>> {
        (**self)
            .get_utxo_diff_since_point(addresses, since, candidates)
            .await
    }

    async fn get_history(
        &self,
        request: &HistoryRequest,
    ) -> Result<PointResult<Vec<ChainTransaction>>> {
        (**self).get_history(request).await
    }

    async fn get_recent_transaction_hashes(
        &self,
        addresses: &[String],
        before: Option<&HistoryCursor>,
    ) -> Result<BTreeMap<String, Vec<TxRef>>> {
        (**self)
            .get_recent_transaction_hashes(addresses, before)
            .await
    }

    async fn get_transactions_by_hashes(
        &self,
        hashes: &[String],
    ) -> Result<BTreeMap<String, ChainTransaction>> {
        (**self).get_transactions_by_hashes(hashes).await
    }
}
