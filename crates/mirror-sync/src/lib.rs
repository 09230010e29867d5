//! Indexer sync for the wallet mirror
//!
//! Mirrors each wallet's UTXO set and transaction history from a remote
//! indexer into the SQLite ledger store, with rollback recovery through
//! UTXO safe points and per-pass atomic commits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::result_large_err)]

pub mod cancel;
pub mod client;
pub mod error;
mod history;
pub mod http;
pub mod locks;
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;
pub mod progress;
pub mod sync;
mod utxo_sync;

pub use cancel::CancelToken;
pub use client::{HistoryRequest, IndexerClient, PointResult, TxRef, UtxoDiff, UtxoDiffItem};
pub use error::{Error, Result};
pub use http::{HttpIndexerClient, HttpIndexerConfig, DEFAULT_REQUEST_TIMEOUT};
pub use locks::WalletSyncLocks;
#[cfg(any(test, feature = "test-helpers"))]
pub use mock::MockIndexer;
pub use progress::{ProgressSnapshot, SyncProgress, SyncStage};
pub use sync::{
    SyncConfig, SyncEngine, SyncReport, DEFAULT_HISTORY_PAGE_SIZE, DEFAULT_MAX_ROLLBACK_RETRIES,
    DEFAULT_REMOTE_TIMEOUT,
};
