//! Chain data types shared by the store and the sync engine

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Block header summary as reported by the indexer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Block hash (hex)
    pub hash: String,
    /// Block height
    pub height: u64,
    /// Epoch number
    pub epoch: u64,
    /// Absolute slot
    pub slot: u64,
    /// Block time (unix seconds)
    pub time: i64,
}

/// Current tip as reported by the indexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipStatus {
    /// Best (most recent) block
    pub best_block: BlockInfo,
    /// Deepest block the indexer considers final
    pub safe_block: BlockInfo,
}

/// Transaction lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TxState {
    /// In the mempool, not yet in a block
    Pending,
    /// Included in a canonical block
    Successful,
    /// Dropped by the remote
    Failed,
}

impl TxState {
    /// Stable string form used in storage
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Successful => "Successful",
            Self::Failed => "Failed",
        }
    }

    /// Parse from storage form
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "Pending" => Ok(Self::Pending),
            "Successful" => Ok(Self::Successful),
            "Failed" => Ok(Self::Failed),
            other => Err(Error::InvalidTransaction(format!(
                "unknown transaction state '{}'",
                other
            ))),
        }
    }

    /// Whether an in-place update from `self` to `next` is allowed.
    ///
    /// `Successful` rows only leave through a rewind and `Failed` rows only
    /// through deletion, so neither accepts a different state here.
    pub const fn can_transition_to(&self, next: TxState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, _)
                | (Self::Successful, Self::Successful)
                | (Self::Failed, Self::Failed)
        )
    }

    /// Validate a transition, returning a typed error on refusal
    pub fn check_transition(&self, next: TxState) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Amount of a non-default token
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenAmount {
    /// Token identifier (`policy_id.name` for native assets)
    pub identifier: String,
    /// Minting policy id (hex)
    pub policy_id: String,
    /// Asset name (hex)
    pub name: String,
    /// Raw amount
    pub amount: u64,
}

impl TokenAmount {
    /// Create from policy id and asset name
    pub fn new(policy_id: impl Into<String>, name: impl Into<String>, amount: u64) -> Self {
        let policy_id = policy_id.into();
        let name = name.into();
        Self {
            identifier: format!("{}.{}", policy_id, name),
            policy_id,
            name,
            amount,
        }
    }
}

/// Position of a confirmed transaction in the chain.
///
/// Ordering is `(height, ordinal)` and is the only ordering used when
/// comparing resume points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxPosition {
    /// Block height
    pub height: u64,
    /// Index of the transaction within its block
    pub ordinal: u32,
}

/// Resume point for paginated history: the last confirmed transaction seen
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryCursor {
    /// Block containing the transaction
    pub block_hash: String,
    /// Transaction hash
    pub tx_hash: String,
}

/// Reference to an output
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtxoKey {
    /// Creating transaction hash
    pub tx_hash: String,
    /// Output index
    pub output_index: u32,
}

impl UtxoKey {
    /// Create a key
    pub fn new(tx_hash: impl Into<String>, output_index: u32) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            output_index,
        }
    }
}

impl fmt::Display for UtxoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_hash, self.output_index)
    }
}

/// Unspent output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Utxo {
    /// Creating transaction hash
    pub tx_hash: String,
    /// Output index
    pub output_index: u32,
    /// Receiving address
    pub address: String,
    /// Default-token amount
    pub amount: u64,
    /// Additional token amounts
    #[serde(default)]
    pub assets: Vec<TokenAmount>,
}

impl Utxo {
    /// Key of this output
    pub fn key(&self) -> UtxoKey {
        UtxoKey::new(self.tx_hash.clone(), self.output_index)
    }
}

/// Transaction input, resolved against the output it spends
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxInput {
    /// Address owning the spent output
    pub address: String,
    /// Spent transaction hash
    pub tx_hash: String,
    /// Spent output index
    pub output_index: u32,
    /// Default-token amount
    pub amount: u64,
    /// Additional token amounts
    #[serde(default)]
    pub assets: Vec<TokenAmount>,
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxOutput {
    /// Receiving address
    pub address: String,
    /// Default-token amount
    pub amount: u64,
    /// Additional token amounts
    #[serde(default)]
    pub assets: Vec<TokenAmount>,
}

/// Transaction as reported by the indexer and stored locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTransaction {
    /// Transaction hash
    pub hash: String,
    /// Lifecycle state
    pub state: TxState,
    /// Containing block (confirmed only)
    pub block: Option<BlockInfo>,
    /// Index within the block (confirmed only)
    pub ordinal: Option<u32>,
    /// Last time the remote changed this record (unix seconds)
    pub last_update: i64,
    /// Inputs
    pub inputs: Vec<TxInput>,
    /// Outputs
    pub outputs: Vec<TxOutput>,
}

impl ChainTransaction {
    /// Chain position, if confirmed
    pub fn position(&self) -> Option<TxPosition> {
        match (&self.block, self.ordinal) {
            (Some(block), Some(ordinal)) => Some(TxPosition {
                height: block.height,
                ordinal,
            }),
            _ => None,
        }
    }

    /// Whether the transaction touches any of `addresses`
    pub fn touches(&self, addresses: &BTreeSet<String>) -> bool {
        self.inputs.iter().any(|i| addresses.contains(&i.address))
            || self.outputs.iter().any(|o| addresses.contains(&o.address))
    }

    /// All addresses appearing in inputs or outputs
    pub fn addresses(&self) -> BTreeSet<&str> {
        self.inputs
            .iter()
            .map(|i| i.address.as_str())
            .chain(self.outputs.iter().map(|o| o.address.as_str()))
            .collect()
    }

    /// Check the block/state pairing: confirmed transactions carry a block
    /// and an ordinal, everything else carries neither.
    pub fn validate(&self) -> Result<()> {
        let has_block = self.block.is_some() && self.ordinal.is_some();
        let no_block = self.block.is_none() && self.ordinal.is_none();
        match self.state {
            TxState::Successful if !has_block => Err(Error::InvalidTransaction(format!(
                "{} is Successful but has no block position",
                self.hash
            ))),
            TxState::Pending | TxState::Failed if !no_block => {
                Err(Error::InvalidTransaction(format!(
                    "{} is {} but references a block",
                    self.hash, self.state
                )))
            }
            _ => Ok(()),
        }
    }
}
