//! Deriving and signing oracles
//!
//! Key material never enters this workspace; address derivation and
//! signing are delegated to implementations of these traits.

use crate::{ChainId, DerivedAddress, Result, TxOutput, UtxoKey};
use serde::{Deserialize, Serialize};

/// Derives addresses for an account
pub trait AddressDeriver: Send + Sync {
    /// Derive the address at `index` on `chain`
    fn derive(&self, chain: ChainId, index: u32) -> Result<DerivedAddress>;
}

/// Unsigned transaction handed to the signer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSkeleton {
    /// Outputs being spent
    pub inputs: Vec<UtxoKey>,
    /// Outputs being created (including change)
    pub outputs: Vec<TxOutput>,
    /// Fee in default-token units
    pub fee: u64,
}

/// Signed transaction ready for submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Transaction hash
    pub hash: String,
    /// Encoded transaction bytes
    pub bytes: Vec<u8>,
}

/// Signs transaction skeletons
pub trait TransactionSigner: Send + Sync {
    /// Sign a skeleton
    fn sign(&self, skeleton: &TxSkeleton) -> Result<SignedTransaction>;
}
