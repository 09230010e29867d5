//! Sync cursors, rewind, and retry/backoff for SQLITE_BUSY
//!
//! Cursor writes are meant to happen inside the same transaction as the
//! data they describe; the `*_tx` functions take the open transaction.

use crate::repository::Repository;
use crate::safe_points::SafePointManager;
use crate::{BlockPointer, Database, Error, Result, SyncCursor};
use mirror_core::{HistoryCursor, WalletId};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::time::Duration;

/// Maximum retry attempts for SQLITE_BUSY
pub const MAX_BUSY_RETRIES: u32 = 5;

/// Base backoff duration in milliseconds
pub const BASE_BACKOFF_MS: u64 = 50;

/// Maximum backoff duration in milliseconds
pub const MAX_BACKOFF_MS: u64 = 1000;

/// How far a rewind goes back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindTarget {
    /// Back to the wallet's UTXO safe point (or genesis if it has none)
    SafePoint,
    /// Drop all chain state of the wallet
    Genesis,
}

/// What a rewind removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewindReport {
    /// Height rewound to, `None` for genesis
    pub height: Option<u64>,
    /// Confirmed transactions deleted
    pub transactions_removed: usize,
    /// UTXO rows deleted or restored
    pub utxos_changed: usize,
    /// Blocks no longer referenced
    pub blocks_released: usize,
}

/// Load a wallet's cursor within a transaction
pub fn load_cursor_tx(conn: &Connection, wallet: &WalletId) -> Result<Option<SyncCursor>> {
    let row = conn
        .query_row(
            r#"
            SELECT last_block_hash, last_height, last_slot, last_sync_time,
                   utxo_block_hash, history_block_hash, history_tx_hash
            FROM sync_cursors
            WHERE wallet_id = ?1
            "#,
            [wallet.as_str()],
            |row| {
                let last_block = match (
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<u64>>(1)?,
                    row.get::<_, Option<u64>>(2)?,
                ) {
                    (Some(hash), Some(height), Some(slot)) => {
                        Some(BlockPointer { hash, height, slot })
                    }
                    _ => None,
                };
                let history = match (
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ) {
                    (Some(block_hash), Some(tx_hash)) => Some(HistoryCursor {
                        block_hash,
                        tx_hash,
                    }),
                    _ => None,
                };
                Ok(SyncCursor {
                    wallet_id: wallet.clone(),
                    last_block,
                    last_sync_time: row.get(3)?,
                    utxo_block_hash: row.get(4)?,
                    history,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Save a cursor within a transaction.
///
/// The block named by `last_block` must already be recorded.
pub fn save_cursor_tx(conn: &Connection, cursor: &SyncCursor) -> Result<()> {
    let last = cursor.last_block.as_ref();
    let history = cursor.history.as_ref();
    conn.execute(
        r#"
        INSERT INTO sync_cursors (
            wallet_id, last_block_hash, last_height, last_slot, last_sync_time,
            utxo_block_hash, history_block_hash, history_tx_hash
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT (wallet_id) DO UPDATE SET
            last_block_hash = excluded.last_block_hash,
            last_height = excluded.last_height,
            last_slot = excluded.last_slot,
            last_sync_time = excluded.last_sync_time,
            utxo_block_hash = excluded.utxo_block_hash,
            history_block_hash = excluded.history_block_hash,
            history_tx_hash = excluded.history_tx_hash
        "#,
        params![
            cursor.wallet_id.as_str(),
            last.map(|b| b.hash.as_str()),
            last.map(|b| b.height),
            last.map(|b| b.slot),
            cursor.last_sync_time,
            cursor.utxo_block_hash,
            history.map(|h| h.block_hash.as_str()),
            history.map(|h| h.tx_hash.as_str()),
        ],
    )?;
    Ok(())
}

/// Delete a wallet's cursor within a transaction
pub fn delete_cursor_tx(conn: &Connection, wallet: &WalletId) -> Result<bool> {
    Ok(conn.execute(
        "DELETE FROM sync_cursors WHERE wallet_id = ?1",
        [wallet.as_str()],
    )? > 0)
}

/// Rewind a wallet's chain state in one transaction
pub fn rewind_wallet(
    db: &mut Database,
    wallet: &WalletId,
    target: RewindTarget,
) -> Result<RewindReport> {
    let tx = db.transaction()?;
    let report = rewind_wallet_tx(&tx, wallet, target)?;
    tx.commit()?;
    Ok(report)
}

/// Rewind a wallet's chain state within a transaction.
///
/// To a safe point: confirmed transactions above it are deleted, the UTXO
/// set is restored from the snapshot, and both sync pointers move back to
/// it. To genesis: every confirmed transaction, UTXO, the safe point and the
/// cursor are dropped. Pending and failed transactions are kept, and other
/// wallets' rows are never touched.
pub fn rewind_wallet_tx(
    conn: &Connection,
    wallet: &WalletId,
    target: RewindTarget,
) -> Result<RewindReport> {
    let repo = Repository::on(conn);
    let safe_points = SafePointManager::new(conn);

    let safe_point = match target {
        RewindTarget::SafePoint => safe_points.get(wallet)?,
        RewindTarget::Genesis => None,
    };

    let mut report = RewindReport::default();

    match safe_point {
        Some(point) => {
            let height = point.block.height;
            report.height = Some(height);
            report.transactions_removed = repo.delete_confirmed_above(wallet, Some(height))?;

            let changes = repo.replace_utxos(wallet, &point.utxo_set())?;
            report.utxos_changed = changes.added.len() + changes.removed.len();

            let mut cursor =
                load_cursor_tx(conn, wallet)?.unwrap_or_else(|| SyncCursor::empty(wallet.clone()));
            cursor.last_block = Some(BlockPointer::from(&point.block));
            cursor.utxo_block_hash = Some(point.block.hash.clone());
            cursor.history = repo.last_confirmed_at_or_below(wallet, height)?;
            save_cursor_tx(conn, &cursor)?;
        }
        None => {
            report.transactions_removed = repo.delete_confirmed_above(wallet, None)?;
            report.utxos_changed = repo.clear_utxos(wallet)?;
            safe_points.delete(wallet)?;
            delete_cursor_tx(conn, wallet)?;
        }
    }

    report.blocks_released = repo.gc_blocks()?;

    tracing::info!(
        "Rewound wallet {} to {}: {} transactions removed, {} UTXOs changed, {} blocks released",
        wallet,
        report
            .height
            .map(|h| format!("height {}", h))
            .unwrap_or_else(|| "genesis".to_string()),
        report.transactions_removed,
        report.utxos_changed,
        report.blocks_released
    );

    Ok(report)
}

/// Delay before retry number `attempt` (starting at 1) of an operation
/// that failed with `err`, or `None` if it should not be retried.
///
/// Only SQLITE_BUSY/SQLITE_LOCKED are retried, at most `MAX_BUSY_RETRIES`
/// times. The caller does the sleeping.
pub fn busy_backoff(err: &Error, attempt: u32) -> Option<Duration> {
    match err {
        Error::Database(e) if is_busy_error(e) && attempt <= MAX_BUSY_RETRIES => {
            Some(Duration::from_millis(calculate_backoff(attempt)))
        }
        _ => None,
    }
}

/// Check if error is SQLITE_BUSY
fn is_busy_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked,
                ..
            },
            _
        )
    )
}

/// Calculate exponential backoff with jitter
fn calculate_backoff(attempt: u32) -> u64 {
    let base = BASE_BACKOFF_MS * (1 << attempt.min(6));
    let jitter = rand::random::<u64>() % (base / 4 + 1);
    (base + jitter).min(MAX_BACKOFF_MS)
}
