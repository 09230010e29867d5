//! Database models

use mirror_core::{BlockInfo, ChainId, HistoryCursor, Utxo, WalletId, WalletKind};
use serde::{Deserialize, Serialize};

/// Wallet record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    /// Wallet id
    pub id: WalletId,
    /// Display name
    pub name: String,
    /// Capability kind
    pub kind: WalletKind,
    /// Created timestamp (unix seconds)
    pub created_at: i64,
}

impl WalletRecord {
    /// New record stamped with the current time
    pub fn new(id: WalletId, name: impl Into<String>, kind: WalletKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Address record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Owning wallet
    pub wallet_id: WalletId,
    /// Encoded address
    pub hash: String,
    /// HD chain (None for imported watch-only addresses)
    pub chain: Option<ChainId>,
    /// Derivation index on the chain
    pub derivation_index: Option<u32>,
    /// Set once the address appears on chain
    pub used: bool,
}

/// Token record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Token identifier (empty for the native currency)
    pub identifier: String,
    /// Minting policy id
    pub policy_id: String,
    /// Asset name
    pub name: String,
    /// Decimals, if known
    pub decimals: Option<u32>,
    /// Whether this is the native currency
    pub is_default: bool,
}

/// Block reference held by a cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPointer {
    /// Block hash
    pub hash: String,
    /// Block height
    pub height: u64,
    /// Absolute slot
    pub slot: u64,
}

impl From<&BlockInfo> for BlockPointer {
    fn from(block: &BlockInfo) -> Self {
        Self {
            hash: block.hash.clone(),
            height: block.height,
            slot: block.slot,
        }
    }
}

/// Per-wallet sync cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Owning wallet
    pub wallet_id: WalletId,
    /// Best block the last successful pass synced to
    pub last_block: Option<BlockPointer>,
    /// Time of the last successful pass (unix seconds)
    pub last_sync_time: i64,
    /// Block the materialized UTXO set corresponds to
    pub utxo_block_hash: Option<String>,
    /// Last confirmed transaction merged into history
    pub history: Option<HistoryCursor>,
}

impl SyncCursor {
    /// Empty cursor for a wallet that was never synced
    pub fn empty(wallet_id: WalletId) -> Self {
        Self {
            wallet_id,
            last_block: None,
            last_sync_time: 0,
            utxo_block_hash: None,
            history: None,
        }
    }
}

/// Full UTXO snapshot at a safe block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoSafePoint {
    /// Owning wallet
    pub wallet_id: WalletId,
    /// Safe block the snapshot was taken at
    pub block: BlockInfo,
    /// UTXOs as of `block`
    pub utxos: Vec<Utxo>,
}

/// Outcome of merging one remote transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New row
    Inserted,
    /// Existing row changed
    Updated,
    /// Failed row replaced by a confirmed one
    Replaced,
    /// Nothing to do
    Unchanged,
    /// Remote state not applicable to the local row; left as is
    Ignored,
}
