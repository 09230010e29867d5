//! History phase of a sync pass
//!
//! Confirmed history of the addresses recorded before the pass is paged
//! forward from the wallet's history cursor up to the best block. Addresses
//! the pass records for the first time are paged from genesis to the same
//! block. Local pending transactions that the remote stopped reporting are
//! resolved by hash: still known means still pending, unknown everywhere
//! means failed.

use crate::client::{HistoryRequest, IndexerClient, PointResult};
use crate::sync::{SyncEngine, WalletSnapshot};
use crate::{Error, Result};
use mirror_core::{BlockInfo, ChainTransaction, HistoryCursor, TipStatus, TxPosition, TxState};
use std::collections::{BTreeMap, BTreeSet};

/// Transactions a pass will merge
#[derive(Debug, Clone, Default)]
pub(crate) struct HistoryPlan {
    /// Confirmed transactions after the cursor, for addresses recorded
    /// before the pass
    pub known: Vec<ChainTransaction>,
    /// Confirmed transactions from genesis, for addresses first recorded by
    /// the pass
    pub fresh: Vec<ChainTransaction>,
    /// Pending and failed transactions reported by the remote
    pub unconfirmed: Vec<ChainTransaction>,
    /// Local pending hashes the remote no longer knows
    pub failed: Vec<String>,
    /// History cursor after the merge
    pub cursor: Option<HistoryCursor>,
}

impl HistoryPlan {
    /// Confirmed transactions of both ranges in chain order, each once
    pub fn confirmed(&self) -> Vec<&ChainTransaction> {
        let mut seen = BTreeSet::new();
        let mut all: Vec<&ChainTransaction> = self
            .known
            .iter()
            .chain(self.fresh.iter())
            .filter(|tx| seen.insert(tx.hash.as_str()))
            .collect();
        all.sort_by_key(|tx| tx.position());
        all
    }
}

/// One address range paged up to the best block
#[derive(Debug, Default)]
struct HistoryRange {
    confirmed: Vec<ChainTransaction>,
    unconfirmed: BTreeMap<String, ChainTransaction>,
    last: Option<(TxPosition, HistoryCursor)>,
}

impl<C: IndexerClient> SyncEngine<C> {
    pub(crate) async fn fetch_history(
        &self,
        snapshot: &WalletSnapshot,
        tip: &TipStatus,
    ) -> Result<HistoryPlan> {
        let best = &tip.best_block;
        let start = snapshot.cursor.as_ref().and_then(|c| c.history.clone());

        let known = self
            .fetch_range(snapshot.known_addresses(), start.clone(), best)
            .await?;
        let fresh = self.fetch_range(snapshot.fresh_addresses(), None, best).await?;

        // Everything in the known range lies after the start; the fresh
        // range only moves the cursor when it ends further along.
        let (mut cursor, position) = match known.last {
            Some((position, cursor)) => (Some(cursor), Some(position)),
            None => (start, snapshot.cursor_position),
        };
        if let Some((last, fresh_cursor)) = fresh.last {
            if cursor.is_none() || position.map_or(false, |current| last > current) {
                cursor = Some(fresh_cursor);
            }
        }

        let mut plan = HistoryPlan {
            known: known.confirmed,
            fresh: fresh.confirmed,
            cursor,
            ..Default::default()
        };

        let mut seen: BTreeSet<String> = plan
            .known
            .iter()
            .chain(plan.fresh.iter())
            .map(|tx| tx.hash.clone())
            .collect();
        let mut unconfirmed = known.unconfirmed;
        unconfirmed.extend(fresh.unconfirmed);
        unconfirmed.retain(|hash, _| !seen.contains(hash));
        seen.extend(unconfirmed.keys().cloned());
        plan.unconfirmed = unconfirmed.into_values().collect();

        let missing: Vec<String> = snapshot
            .pending
            .iter()
            .filter(|hash| !seen.contains(*hash))
            .cloned()
            .collect();
        if !missing.is_empty() {
            self.resolve_missing(snapshot, &missing, &mut plan).await?;
        }

        tracing::debug!(
            "History of wallet {}: {} + {} confirmed, {} unconfirmed, {} failed",
            snapshot.wallet,
            plan.known.len(),
            plan.fresh.len(),
            plan.unconfirmed.len(),
            plan.failed.len()
        );
        Ok(plan)
    }

    /// Page the history of `addresses` after `start` up to `best`
    async fn fetch_range(
        &self,
        addresses: Vec<String>,
        start: Option<HistoryCursor>,
        best: &BlockInfo,
    ) -> Result<HistoryRange> {
        let mut range = HistoryRange::default();
        if addresses.is_empty() {
            return Ok(range);
        }

        let limit = self.config.history_page_size.max(1);
        let mut after = start;

        loop {
            let request = HistoryRequest {
                addresses: addresses.clone(),
                until_block: best.hash.clone(),
                after: after.clone(),
                limit,
            };
            let page = match self
                .remote("history page", self.client.get_history(&request))
                .await?
            {
                PointResult::Found(page) => page,
                PointResult::Rollback => {
                    return Err(Error::Rollback(format!(
                        "history after {:?} up to block {} is not canonical",
                        request.after.as_ref().map(|c| c.tx_hash.as_str()),
                        best.height
                    )))
                }
            };
            self.progress.record_history_page();

            let mut confirmed = Vec::new();
            for tx in page {
                tx.validate()
                    .map_err(|e| Error::Remote(format!("history page: {}", e)))?;
                match tx.state {
                    TxState::Successful => confirmed.push(tx),
                    TxState::Pending | TxState::Failed => {
                        range.unconfirmed.insert(tx.hash.clone(), tx);
                    }
                }
            }
            confirmed.sort_by_key(|tx| tx.position());

            let count = confirmed.len();
            for tx in confirmed {
                let position = tx.position();
                if position.map_or(false, |p| p.height > best.height) {
                    return Err(Error::Remote(format!(
                        "transaction {} is above the requested block {}",
                        tx.hash, best.height
                    )));
                }
                let last_position = range.last.as_ref().map(|(p, _)| *p);
                if last_position.is_some() && position <= last_position {
                    return Err(Error::Remote(format!(
                        "history page is not in chain order at {}",
                        tx.hash
                    )));
                }
                if let (Some(block), Some(position)) = (&tx.block, position) {
                    let cursor = HistoryCursor {
                        block_hash: block.hash.clone(),
                        tx_hash: tx.hash.clone(),
                    };
                    after = Some(cursor.clone());
                    range.last = Some((position, cursor));
                }
                range.confirmed.push(tx);
            }

            if count < limit {
                break;
            }
        }

        let confirmed: BTreeSet<&str> = range.confirmed.iter().map(|tx| tx.hash.as_str()).collect();
        range.unconfirmed.retain(|hash, _| !confirmed.contains(hash.as_str()));
        Ok(range)
    }

    /// Look up local pending transactions absent from the history pages
    async fn resolve_missing(
        &self,
        snapshot: &WalletSnapshot,
        missing: &[String],
        plan: &mut HistoryPlan,
    ) -> Result<()> {
        let mut by_hash = self
            .remote(
                "transaction lookup",
                self.client.get_transactions_by_hashes(missing),
            )
            .await?;
        let recent: BTreeSet<String> = self
            .remote(
                "recent transactions",
                self.client.get_recent_transaction_hashes(&snapshot.addresses, None),
            )
            .await?
            .into_values()
            .flatten()
            .map(|r| r.tx_hash)
            .collect();

        for hash in missing {
            match by_hash.remove(hash) {
                Some(tx) if tx.state == TxState::Failed => {
                    tx.validate()
                        .map_err(|e| Error::Remote(format!("transaction lookup: {}", e)))?;
                    plan.unconfirmed.push(tx);
                }
                // Still pending, or confirmed beyond this pass's tip; a later
                // pass picks it up through the history pages.
                Some(_) => {}
                None if recent.contains(hash) => {}
                None => {
                    tracing::info!(
                        "Pending transaction {} of wallet {} is unknown to the indexer, marking failed",
                        hash,
                        snapshot.wallet
                    );
                    plan.failed.push(hash.clone());
                }
            }
        }
        Ok(())
    }
}
