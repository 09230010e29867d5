//! Data access layer

use crate::{models::*, Database, Error, Result};
use mirror_core::{
    BlockInfo, ChainId, ChainTransaction, HistoryCursor, TokenAmount, TxInput, TxOutput, TxState,
    Utxo, UtxoKey, UtxoSet, WalletId, WalletKind,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, BTreeSet};

/// Identifier of the native currency in `tokens` and `utxo_assets`
pub const DEFAULT_TOKEN_ID: &str = "";

const TX_COLUMNS: &str = r#"
    t.hash, t.state, t.block_hash, t.ordinal, t.last_update, t.inputs, t.outputs,
    b.height, b.epoch, b.slot, b.time
"#;

/// UTXO rows written by `replace_utxos`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoChanges {
    /// Outputs inserted
    pub added: Vec<Utxo>,
    /// Outputs deleted
    pub removed: Vec<UtxoKey>,
}

impl UtxoChanges {
    /// Whether anything was written
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Repository for database operations.
///
/// Works on a plain connection or inside a transaction, so several
/// repository calls can form one atomic step.
pub struct Repository<'a> {
    conn: &'a Connection,
}

impl<'a> Repository<'a> {
    /// Create repository
    pub fn new(db: &'a Database) -> Self {
        Self { conn: db.conn() }
    }

    /// Create repository over a connection or open transaction
    pub fn on(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // ------------------------------------------------------------------
    // Wallets
    // ------------------------------------------------------------------

    /// Insert wallet
    pub fn create_wallet(&self, wallet: &WalletRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO wallets (id, name, kind, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                wallet.id.as_str(),
                wallet.name,
                wallet.kind.as_str(),
                wallet.created_at
            ],
        )?;
        tracing::debug!("Created wallet {} ({})", wallet.id, wallet.kind.as_str());
        Ok(())
    }

    /// Get wallet by id
    pub fn get_wallet(&self, id: &WalletId) -> Result<Option<WalletRecord>> {
        self.conn
            .query_row(
                "SELECT id, name, kind, created_at FROM wallets WHERE id = ?1",
                [id.as_str()],
                wallet_from_row,
            )
            .optional()?
            .transpose()
    }

    /// Get wallet or fail with `NotFound`
    pub fn require_wallet(&self, id: &WalletId) -> Result<WalletRecord> {
        self.get_wallet(id)?
            .ok_or_else(|| Error::NotFound(format!("wallet {}", id)))
    }

    /// All wallets ordered by id
    pub fn list_wallets(&self) -> Result<Vec<WalletRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, kind, created_at FROM wallets ORDER BY id")?;
        let rows = stmt.query_map([], wallet_from_row)?;
        let mut wallets = Vec::new();
        for row in rows {
            wallets.push(row??);
        }
        Ok(wallets)
    }

    /// Delete wallet and everything it owns, then drop unreferenced blocks
    pub fn delete_wallet(&self, id: &WalletId) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM wallets WHERE id = ?1", [id.as_str()])?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("wallet {}", id)));
        }
        let blocks = self.gc_blocks()?;
        tracing::info!("Deleted wallet {} ({} blocks released)", id, blocks);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Addresses
    // ------------------------------------------------------------------

    /// Insert address; an existing row for the same hash is left untouched.
    ///
    /// A new address invalidates the wallet's UTXO safe point and history
    /// cursor, which only cover the addresses known when they were taken.
    pub fn insert_address(&self, address: &AddressRecord) -> Result<bool> {
        let inserted = self.record_address(address)?;
        if inserted {
            self.conn.execute(
                "DELETE FROM utxo_safe_points WHERE wallet_id = ?1",
                [address.wallet_id.as_str()],
            )?;
            self.conn.execute(
                r#"
                UPDATE sync_cursors SET history_block_hash = NULL, history_tx_hash = NULL
                WHERE wallet_id = ?1
                "#,
                [address.wallet_id.as_str()],
            )?;
        }
        Ok(inserted)
    }

    /// Insert address without touching the safe point or cursor. Only for
    /// addresses whose history and UTXOs are merged in the same transaction.
    pub fn record_address(&self, address: &AddressRecord) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT INTO addresses (wallet_id, hash, chain, derivation_index, used)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (wallet_id, hash) DO NOTHING
            "#,
            params![
                address.wallet_id.as_str(),
                address.hash,
                address.chain.map(|c| c.as_index()),
                address.derivation_index,
                address.used
            ],
        )?;
        Ok(inserted > 0)
    }

    /// All addresses of a wallet
    pub fn get_addresses(&self, wallet: &WalletId) -> Result<Vec<AddressRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT wallet_id, hash, chain, derivation_index, used
            FROM addresses
            WHERE wallet_id = ?1
            ORDER BY chain, derivation_index, hash
            "#,
        )?;
        let rows = stmt.query_map([wallet.as_str()], address_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    /// Address hashes of a wallet
    pub fn address_set(&self, wallet: &WalletId) -> Result<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT hash FROM addresses WHERE wallet_id = ?1")?;
        let rows = stmt.query_map([wallet.as_str()], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<BTreeSet<_>, _>>()?)
    }

    /// Address at a derivation position
    pub fn address_at(
        &self,
        wallet: &WalletId,
        chain: ChainId,
        index: u32,
    ) -> Result<Option<AddressRecord>> {
        self.conn
            .query_row(
                r#"
                SELECT wallet_id, hash, chain, derivation_index, used
                FROM addresses
                WHERE wallet_id = ?1 AND chain = ?2 AND derivation_index = ?3
                "#,
                params![wallet.as_str(), chain.as_index(), index],
                address_from_row,
            )
            .optional()?
            .transpose()
    }

    /// Set the used flag on any of `hashes` owned by the wallet; returns the
    /// number of addresses newly marked
    pub fn mark_addresses_used<'h, I>(&self, wallet: &WalletId, hashes: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'h str>,
    {
        let mut stmt = self.conn.prepare_cached(
            "UPDATE addresses SET used = 1 WHERE wallet_id = ?1 AND hash = ?2 AND used = 0",
        )?;
        let mut marked = 0;
        for hash in hashes {
            marked += stmt.execute(params![wallet.as_str(), hash])?;
        }
        Ok(marked)
    }

    /// Highest used derivation index on a chain
    pub fn highest_used_index(&self, wallet: &WalletId, chain: ChainId) -> Result<Option<u32>> {
        Ok(self.conn.query_row(
            r#"
            SELECT MAX(derivation_index) FROM addresses
            WHERE wallet_id = ?1 AND chain = ?2 AND used = 1
            "#,
            params![wallet.as_str(), chain.as_index()],
            |row| row.get::<_, Option<u32>>(0),
        )?)
    }

    /// Recorded derivation indices of a chain
    pub fn derivation_indices(&self, wallet: &WalletId, chain: ChainId) -> Result<BTreeSet<u32>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT derivation_index FROM addresses
            WHERE wallet_id = ?1 AND chain = ?2 AND derivation_index IS NOT NULL
            "#,
        )?;
        let rows = stmt.query_map(params![wallet.as_str(), chain.as_index()], |row| {
            row.get::<_, u32>(0)
        })?;
        Ok(rows.collect::<std::result::Result<BTreeSet<_>, _>>()?)
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    /// Record a block; an existing row must match exactly
    pub fn insert_block(&self, block: &BlockInfo) -> Result<()> {
        if let Some(existing) = self.get_block(&block.hash)? {
            if existing != *block {
                return Err(Error::InvariantViolation(format!(
                    "block {} already recorded with different header data",
                    block.hash
                )));
            }
            return Ok(());
        }
        self.conn.execute(
            "INSERT INTO blocks (hash, height, epoch, slot, time) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![block.hash, block.height, block.epoch, block.slot, block.time],
        )?;
        Ok(())
    }

    /// Get block by hash
    pub fn get_block(&self, hash: &str) -> Result<Option<BlockInfo>> {
        Ok(self
            .conn
            .query_row(
                "SELECT hash, height, epoch, slot, time FROM blocks WHERE hash = ?1",
                [hash],
                |row| {
                    Ok(BlockInfo {
                        hash: row.get(0)?,
                        height: row.get(1)?,
                        epoch: row.get(2)?,
                        slot: row.get(3)?,
                        time: row.get(4)?,
                    })
                },
            )
            .optional()?)
    }

    /// Delete blocks no longer referenced by any transaction, cursor or
    /// safe point
    pub fn gc_blocks(&self) -> Result<usize> {
        Ok(self.conn.execute(
            r#"
            DELETE FROM blocks
            WHERE hash NOT IN (SELECT block_hash FROM transactions WHERE block_hash IS NOT NULL)
              AND hash NOT IN (SELECT last_block_hash FROM sync_cursors WHERE last_block_hash IS NOT NULL)
              AND hash NOT IN (SELECT block_hash FROM utxo_safe_points)
            "#,
            [],
        )?)
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    /// Record a non-default token if unseen
    pub fn ensure_token(&self, token: &TokenAmount) -> Result<()> {
        if token.identifier == DEFAULT_TOKEN_ID {
            return Err(Error::Validation(
                "asset list must not contain the default token".to_string(),
            ));
        }
        self.conn.execute(
            r#"
            INSERT INTO tokens (identifier, policy_id, name, decimals, is_default)
            VALUES (?1, ?2, ?3, NULL, 0)
            ON CONFLICT (identifier) DO NOTHING
            "#,
            params![token.identifier, token.policy_id, token.name],
        )?;
        Ok(())
    }

    /// Set decimals of the native currency
    pub fn set_default_token_decimals(&self, decimals: u32) -> Result<()> {
        self.conn.execute(
            "UPDATE tokens SET decimals = ?1 WHERE is_default = 1 AND decimals IS NOT ?1",
            [decimals],
        )?;
        Ok(())
    }

    /// All tokens
    pub fn get_tokens(&self) -> Result<Vec<TokenRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT identifier, policy_id, name, decimals, is_default FROM tokens ORDER BY identifier",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TokenRecord {
                identifier: row.get(0)?,
                policy_id: row.get(1)?,
                name: row.get(2)?,
                decimals: row.get(3)?,
                is_default: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Get transaction
    pub fn get_transaction(
        &self,
        wallet: &WalletId,
        hash: &str,
    ) -> Result<Option<ChainTransaction>> {
        let sql = format!(
            r#"
            SELECT {} FROM transactions t
            LEFT JOIN blocks b ON b.hash = t.block_hash
            WHERE t.wallet_id = ?1 AND t.hash = ?2
            "#,
            TX_COLUMNS
        );
        self.conn
            .query_row(&sql, params![wallet.as_str(), hash], transaction_from_row)
            .optional()?
            .transpose()
    }

    /// All transactions of a wallet: confirmed in chain order, then the rest
    pub fn list_transactions(&self, wallet: &WalletId) -> Result<Vec<ChainTransaction>> {
        self.query_transactions(wallet, None)
    }

    /// Transactions of a wallet in one state
    pub fn transactions_in_state(
        &self,
        wallet: &WalletId,
        state: TxState,
    ) -> Result<Vec<ChainTransaction>> {
        self.query_transactions(wallet, Some(state))
    }

    fn query_transactions(
        &self,
        wallet: &WalletId,
        state: Option<TxState>,
    ) -> Result<Vec<ChainTransaction>> {
        let sql = format!(
            r#"
            SELECT {} FROM transactions t
            LEFT JOIN blocks b ON b.hash = t.block_hash
            WHERE t.wallet_id = ?1 AND (?2 IS NULL OR t.state = ?2)
            ORDER BY b.height IS NULL, b.height, t.ordinal, t.hash
            "#,
            TX_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![wallet.as_str(), state.map(|s| s.as_str())],
            transaction_from_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    /// Insert a transaction row (its block, if any, is recorded first)
    pub fn insert_transaction(&self, wallet: &WalletId, tx: &ChainTransaction) -> Result<()> {
        tx.validate()?;
        if let Some(block) = &tx.block {
            self.insert_block(block)?;
        }
        self.conn.execute(
            r#"
            INSERT INTO transactions
                (wallet_id, hash, state, block_hash, ordinal, last_update, inputs, outputs)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                wallet.as_str(),
                tx.hash,
                tx.state.as_str(),
                tx.block.as_ref().map(|b| b.hash.as_str()),
                tx.ordinal,
                tx.last_update,
                serde_json::to_string(&tx.inputs)?,
                serde_json::to_string(&tx.outputs)?,
            ],
        )?;
        Ok(())
    }

    fn update_transaction(&self, wallet: &WalletId, tx: &ChainTransaction) -> Result<()> {
        tx.validate()?;
        if let Some(block) = &tx.block {
            self.insert_block(block)?;
        }
        self.conn.execute(
            r#"
            UPDATE transactions SET
                state = ?3, block_hash = ?4, ordinal = ?5, last_update = ?6,
                inputs = ?7, outputs = ?8
            WHERE wallet_id = ?1 AND hash = ?2
            "#,
            params![
                wallet.as_str(),
                tx.hash,
                tx.state.as_str(),
                tx.block.as_ref().map(|b| b.hash.as_str()),
                tx.ordinal,
                tx.last_update,
                serde_json::to_string(&tx.inputs)?,
                serde_json::to_string(&tx.outputs)?,
            ],
        )?;
        Ok(())
    }

    /// Delete a transaction row
    pub fn delete_transaction(&self, wallet: &WalletId, hash: &str) -> Result<bool> {
        Ok(self.conn.execute(
            "DELETE FROM transactions WHERE wallet_id = ?1 AND hash = ?2",
            params![wallet.as_str(), hash],
        )? > 0)
    }

    /// Merge a transaction reported by the remote into the store.
    ///
    /// `Pending` rows take any remote state. `Successful` rows are only
    /// removed by a rewind, so a differing remote report for one is ignored.
    /// A `Failed` row that the remote now reports confirmed is replaced.
    pub fn merge_transaction(
        &self,
        wallet: &WalletId,
        remote: &ChainTransaction,
    ) -> Result<MergeOutcome> {
        let Some(local) = self.get_transaction(wallet, &remote.hash)? else {
            self.insert_transaction(wallet, remote)?;
            return Ok(MergeOutcome::Inserted);
        };

        if local == *remote {
            return Ok(MergeOutcome::Unchanged);
        }

        match (local.state, remote.state) {
            (TxState::Pending, _) => {
                local.state.check_transition(remote.state)?;
                self.update_transaction(wallet, remote)?;
                Ok(MergeOutcome::Updated)
            }
            (TxState::Failed, TxState::Successful) => {
                self.delete_transaction(wallet, &remote.hash)?;
                self.insert_transaction(wallet, remote)?;
                Ok(MergeOutcome::Replaced)
            }
            (TxState::Successful, TxState::Successful) => {
                if local.block.as_ref().map(|b| &b.hash) != remote.block.as_ref().map(|b| &b.hash)
                    || local.ordinal != remote.ordinal
                {
                    return Err(Error::InvariantViolation(format!(
                        "transaction {} reported in a different block without a rollback",
                        remote.hash
                    )));
                }
                Ok(MergeOutcome::Unchanged)
            }
            (from, to) => {
                tracing::warn!(
                    "Ignoring remote state {} for local {} transaction {}",
                    to,
                    from,
                    remote.hash
                );
                Ok(MergeOutcome::Ignored)
            }
        }
    }

    /// Mark a pending transaction failed
    pub fn mark_failed(&self, wallet: &WalletId, hash: &str) -> Result<()> {
        let local = self
            .get_transaction(wallet, hash)?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", hash)))?;
        local.state.check_transition(TxState::Failed)?;
        self.conn.execute(
            "UPDATE transactions SET state = 'Failed' WHERE wallet_id = ?1 AND hash = ?2",
            params![wallet.as_str(), hash],
        )?;
        Ok(())
    }

    /// Last confirmed transaction at or below `height`, in chain order
    pub fn last_confirmed_at_or_below(
        &self,
        wallet: &WalletId,
        height: u64,
    ) -> Result<Option<HistoryCursor>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT t.block_hash, t.hash FROM transactions t
                JOIN blocks b ON b.hash = t.block_hash
                WHERE t.wallet_id = ?1 AND t.state = 'Successful' AND b.height <= ?2
                ORDER BY b.height DESC, t.ordinal DESC
                LIMIT 1
                "#,
                params![wallet.as_str(), height],
                |row| {
                    Ok(HistoryCursor {
                        block_hash: row.get(0)?,
                        tx_hash: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    /// Delete confirmed transactions above `height` (all of them if `None`)
    pub fn delete_confirmed_above(&self, wallet: &WalletId, height: Option<u64>) -> Result<usize> {
        Ok(self.conn.execute(
            r#"
            DELETE FROM transactions
            WHERE wallet_id = ?1 AND state = 'Successful'
              AND (?2 IS NULL OR block_hash IN (SELECT hash FROM blocks WHERE height > ?2))
            "#,
            params![wallet.as_str(), height],
        )?)
    }

    // ------------------------------------------------------------------
    // UTXOs
    // ------------------------------------------------------------------

    /// Materialized UTXO set of a wallet
    pub fn get_utxos(&self, wallet: &WalletId) -> Result<UtxoSet> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT u.tx_hash, u.output_index, u.address, a.token_id, a.amount,
                   tok.policy_id, tok.name
            FROM utxos u
            JOIN utxo_assets a
              ON a.wallet_id = u.wallet_id AND a.tx_hash = u.tx_hash
             AND a.output_index = u.output_index
            JOIN tokens tok ON tok.identifier = a.token_id
            WHERE u.wallet_id = ?1
            ORDER BY u.tx_hash, u.output_index, a.token_id
            "#,
        )?;
        let mut rows = stmt.query([wallet.as_str()])?;

        let mut set = UtxoSet::new();
        while let Some(row) = rows.next()? {
            let key = UtxoKey::new(row.get::<_, String>(0)?, row.get(1)?);
            let address: String = row.get(2)?;
            let token_id: String = row.get(3)?;
            let amount = amount_from_sql(row.get(4)?)?;

            let utxo = set.entry(key.clone()).or_insert_with(|| Utxo {
                tx_hash: key.tx_hash.clone(),
                output_index: key.output_index,
                address,
                amount: 0,
                assets: Vec::new(),
            });
            if token_id == DEFAULT_TOKEN_ID {
                utxo.amount = amount;
            } else {
                utxo.assets.push(TokenAmount {
                    identifier: token_id,
                    policy_id: row.get(5)?,
                    name: row.get(6)?,
                    amount,
                });
            }
        }
        Ok(set)
    }

    /// Insert one UTXO with its default-token and asset amounts
    pub fn insert_utxo(&self, wallet: &WalletId, utxo: &Utxo) -> Result<()> {
        let owned: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM addresses WHERE wallet_id = ?1 AND hash = ?2)",
            params![wallet.as_str(), utxo.address],
            |row| row.get(0),
        )?;
        if !owned {
            return Err(Error::Validation(format!(
                "UTXO {} belongs to {} which is not an address of wallet {}",
                utxo.key(),
                utxo.address,
                wallet
            )));
        }

        self.conn.execute(
            "INSERT INTO utxos (wallet_id, tx_hash, output_index, address) VALUES (?1, ?2, ?3, ?4)",
            params![wallet.as_str(), utxo.tx_hash, utxo.output_index, utxo.address],
        )?;

        // Every output carries the default token, even with no other assets
        self.insert_utxo_asset(wallet, utxo, DEFAULT_TOKEN_ID, utxo.amount)?;
        for asset in &utxo.assets {
            self.ensure_token(asset)?;
            self.insert_utxo_asset(wallet, utxo, &asset.identifier, asset.amount)?;
        }
        Ok(())
    }

    fn insert_utxo_asset(&self, wallet: &WalletId, utxo: &Utxo, token: &str, amount: u64) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO utxo_assets (wallet_id, tx_hash, output_index, token_id, amount)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                wallet.as_str(),
                utxo.tx_hash,
                utxo.output_index,
                token,
                amount_to_sql(amount)?
            ],
        )?;
        Ok(())
    }

    /// Delete one UTXO (assets cascade)
    pub fn delete_utxo(&self, wallet: &WalletId, key: &UtxoKey) -> Result<bool> {
        Ok(self.conn.execute(
            "DELETE FROM utxos WHERE wallet_id = ?1 AND tx_hash = ?2 AND output_index = ?3",
            params![wallet.as_str(), key.tx_hash, key.output_index],
        )? > 0)
    }

    /// Make the wallet's UTXO rows equal `target`, writing only the rows
    /// that differ
    pub fn replace_utxos(&self, wallet: &WalletId, target: &UtxoSet) -> Result<UtxoChanges> {
        let current = self.get_utxos(wallet)?;
        let mut changes = UtxoChanges::default();

        let target = target
            .iter()
            .map(|(key, utxo)| Ok::<_, Error>((key.clone(), normalize_utxo(utxo)?)))
            .collect::<Result<UtxoSet>>()?;

        for (key, utxo) in &current {
            if target.get(key) != Some(utxo) {
                self.delete_utxo(wallet, key)?;
                changes.removed.push(key.clone());
            }
        }
        for (key, utxo) in &target {
            if current.get(key) != Some(utxo) {
                self.insert_utxo(wallet, utxo)?;
                changes.added.push(utxo.clone());
            }
        }
        Ok(changes)
    }

    /// Delete all UTXOs of a wallet
    pub fn clear_utxos(&self, wallet: &WalletId) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM utxos WHERE wallet_id = ?1", [wallet.as_str()])?)
    }
}

/// Canonical form of a UTXO as stored: assets sorted by identifier with
/// duplicate entries summed
pub fn normalize_utxo(utxo: &Utxo) -> Result<Utxo> {
    let mut assets: BTreeMap<String, TokenAmount> = BTreeMap::new();
    for asset in &utxo.assets {
        match assets.get_mut(&asset.identifier) {
            Some(existing) => {
                existing.amount = existing.amount.checked_add(asset.amount).ok_or_else(|| {
                    Error::Validation(format!("asset amount overflow in {}", utxo.key()))
                })?;
            }
            None => {
                assets.insert(asset.identifier.clone(), asset.clone());
            }
        }
    }
    Ok(Utxo {
        assets: assets.into_values().collect(),
        ..utxo.clone()
    })
}

pub(crate) fn amount_to_sql(amount: u64) -> Result<i64> {
    i64::try_from(amount)
        .map_err(|_| Error::Validation(format!("amount {} exceeds storable range", amount)))
}

pub(crate) fn amount_from_sql(amount: i64) -> Result<u64> {
    u64::try_from(amount)
        .map_err(|_| Error::InvariantViolation(format!("negative stored amount {}", amount)))
}

fn wallet_from_row(row: &Row<'_>) -> rusqlite::Result<Result<WalletRecord>> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let created_at: i64 = row.get(3)?;
    Ok(WalletKind::parse(&kind)
        .map(|kind| WalletRecord {
            id: WalletId::new(id),
            name,
            kind,
            created_at,
        })
        .ok_or_else(|| Error::InvariantViolation(format!("unknown wallet kind '{}'", kind))))
}

fn address_from_row(row: &Row<'_>) -> rusqlite::Result<Result<AddressRecord>> {
    let chain: Option<u32> = row.get(2)?;
    let chain = match chain.map(ChainId::from_index).transpose() {
        Ok(chain) => chain,
        Err(e) => return Ok(Err(e.into())),
    };
    Ok(Ok(AddressRecord {
        wallet_id: WalletId::new(row.get::<_, String>(0)?),
        hash: row.get(1)?,
        chain,
        derivation_index: row.get(3)?,
        used: row.get(4)?,
    }))
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Result<ChainTransaction>> {
    let hash: String = row.get(0)?;
    let state: String = row.get(1)?;
    let block_hash: Option<String> = row.get(2)?;
    let ordinal: Option<u32> = row.get(3)?;
    let last_update: i64 = row.get(4)?;
    let inputs: String = row.get(5)?;
    let outputs: String = row.get(6)?;
    let height: Option<u64> = row.get(7)?;

    let block = match (block_hash, height) {
        (Some(hash), Some(height)) => Some(BlockInfo {
            hash,
            height,
            epoch: row.get(8)?,
            slot: row.get(9)?,
            time: row.get(10)?,
        }),
        (Some(block_hash), None) => {
            return Ok(Err(Error::InvariantViolation(format!(
                "transaction {} references unknown block {}",
                hash, block_hash
            ))))
        }
        _ => None,
    };

    Ok(decode_transaction(hash, &state, block, ordinal, last_update, &inputs, &outputs))
}

fn decode_transaction(
    hash: String,
    state: &str,
    block: Option<BlockInfo>,
    ordinal: Option<u32>,
    last_update: i64,
    inputs: &str,
    outputs: &str,
) -> Result<ChainTransaction> {
    let state = TxState::parse(state).map_err(|e| Error::InvariantViolation(e.to_string()))?;
    let inputs: Vec<TxInput> = serde_json::from_str(inputs)?;
    let outputs: Vec<TxOutput> = serde_json::from_str(outputs)?;
    let tx = ChainTransaction {
        hash,
        state,
        block,
        ordinal,
        last_update,
        inputs,
        outputs,
    };
    tx.validate()
        .map_err(|e| Error::InvariantViolation(e.to_string()))?;
    Ok(tx)
}
