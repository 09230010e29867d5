//! Ledger mirror core
//!
//! Domain types shared by the ledger store and the sync engine: chain data,
//! HD address chains, gap-limit cutoffs, wallet handles with static
//! capability sets, the deriving/signing oracle traits, UTXO replay and
//! coin selection.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod cutoff;
pub mod error;
pub mod oracle;
pub mod replay;
pub mod selection;
pub mod types;
pub mod wallet;

pub use address::{ChainId, DerivedAddress};
pub use cutoff::{CutoffWindow, DEFAULT_GAP_LIMIT};
pub use error::{Error, ErrorCategory, Result};
pub use oracle::{AddressDeriver, SignedTransaction, TransactionSigner, TxSkeleton};
pub use replay::{apply_transaction, replay_onto, replay_utxos, UtxoSet};
pub use selection::{select_utxos, SelectionResult, SelectionStrategy, UtxoSelector};
pub use types::{
    BlockInfo, ChainTransaction, HistoryCursor, TipStatus, TokenAmount, TxInput, TxOutput,
    TxPosition, TxState, Utxo, UtxoKey,
};
pub use wallet::{
    CapabilitySet, CutoffCapable, HdSpendingWallet, HdWatchWallet, SigningCapable, UtxoCapable,
    WalletHandle, WalletId, WalletKind, WatchOnlyWallet,
};
