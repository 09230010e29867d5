//! Per-wallet UTXO safe points
//!
//! A safe point is the full UTXO set of a wallet as of a deeply confirmed
//! block. Diff-based sync resumes from it, and a rollback rewinds to it.

use crate::repository::{normalize_utxo, Repository};
use crate::{Error, Result, UtxoSafePoint};
use mirror_core::{Utxo, UtxoSet, WalletId};
use rusqlite::{params, Connection};

/// Safe point manager
pub struct SafePointManager<'a> {
    conn: &'a Connection,
}

impl<'a> SafePointManager<'a> {
    /// Create new safe point manager
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Load the wallet's safe point
    pub fn get(&self, wallet: &WalletId) -> Result<Option<UtxoSafePoint>> {
        let result = self.conn.query_row(
            "SELECT block_hash, utxos FROM utxo_safe_points WHERE wallet_id = ?1",
            [wallet.as_str()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        );

        let (block_hash, utxos) = match result {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let block = Repository::on(self.conn)
            .get_block(&block_hash)?
            .ok_or_else(|| {
                Error::InvariantViolation(format!(
                    "safe point of wallet {} references unknown block {}",
                    wallet, block_hash
                ))
            })?;
        let utxos: Vec<Utxo> = serde_json::from_str(&utxos)?;

        Ok(Some(UtxoSafePoint {
            wallet_id: wallet.clone(),
            block,
            utxos,
        }))
    }

    /// Store (or replace) the wallet's safe point
    pub fn save(&self, point: &UtxoSafePoint) -> Result<()> {
        let repo = Repository::on(self.conn);
        repo.insert_block(&point.block)?;

        let mut snapshot = point
            .utxos
            .iter()
            .map(normalize_utxo)
            .collect::<Result<Vec<_>>>()?;
        snapshot.sort_by_key(|u| u.key());

        self.conn.execute(
            r#"
            INSERT INTO utxo_safe_points (wallet_id, block_hash, height, utxos)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (wallet_id) DO UPDATE SET
                block_hash = excluded.block_hash,
                height = excluded.height,
                utxos = excluded.utxos
            "#,
            params![
                point.wallet_id.as_str(),
                point.block.hash,
                point.block.height,
                serde_json::to_string(&snapshot)?
            ],
        )?;

        tracing::debug!(
            "Saved safe point for wallet {} at height {} ({} UTXOs)",
            point.wallet_id,
            point.block.height,
            snapshot.len()
        );
        Ok(())
    }

    /// Delete the wallet's safe point
    pub fn delete(&self, wallet: &WalletId) -> Result<bool> {
        Ok(self.conn.execute(
            "DELETE FROM utxo_safe_points WHERE wallet_id = ?1",
            [wallet.as_str()],
        )? > 0)
    }
}

impl UtxoSafePoint {
    /// Snapshot as a keyed set
    pub fn utxo_set(&self) -> UtxoSet {
        self.utxos.iter().map(|u| (u.key(), u.clone())).collect()
    }
}
