//! SQLite ledger store for the wallet mirror
//!
//! Provides the WAL-mode database with ordered migrations, the wallet,
//! address, transaction and UTXO repository, sync cursors with rewind,
//! UTXO safe points, the address cutoff manager, the balance aggregator,
//! and full-store dump/restore.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod balance;
pub mod cutoffs;
pub mod database;
pub mod dump;
pub mod error;
pub mod migrations;
pub mod models;
pub mod repository;
pub mod safe_points;
pub mod sync_state;

pub use balance::{get_balance, Balance};
pub use cutoffs::{pop_next_address, AddressCutoffManager};
pub use database::Database;
pub use dump::{export_dump, restore_dump, DumpRow, StoreDump};
pub use error::{Error, Result};
pub use migrations::{MigrationKind, SCHEMA_VERSION};
pub use models::*;
pub use repository::{normalize_utxo, Repository, UtxoChanges, DEFAULT_TOKEN_ID};
pub use safe_points::SafePointManager;
pub use sync_state::{
    busy_backoff, delete_cursor_tx, load_cursor_tx, rewind_wallet, rewind_wallet_tx,
    save_cursor_tx, RewindReport, RewindTarget, BASE_BACKOFF_MS, MAX_BACKOFF_MS,
    MAX_BUSY_RETRIES,
};
