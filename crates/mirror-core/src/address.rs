//! HD address chains and derived addresses

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// HD chain an address is derived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChainId {
    /// Receive addresses
    External,
    /// Change addresses
    Internal,
}

impl ChainId {
    /// All chains in derivation order
    pub const ALL: [ChainId; 2] = [ChainId::External, ChainId::Internal];

    /// BIP-44 style chain index
    pub const fn as_index(&self) -> u32 {
        match self {
            Self::External => 0,
            Self::Internal => 1,
        }
    }

    /// Parse from chain index
    pub fn from_index(index: u32) -> Result<Self> {
        match index {
            0 => Ok(Self::External),
            1 => Ok(Self::Internal),
            other => Err(Error::InvalidAddress(format!("unknown chain index {}", other))),
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External => write!(f, "external"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Address produced by the deriving oracle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivedAddress {
    /// Encoded address
    pub hash: String,
    /// HD chain
    pub chain: ChainId,
    /// Derivation index on the chain
    pub index: u32,
}

impl DerivedAddress {
    /// Create a derived address, rejecting empty encodings
    pub fn new(hash: impl Into<String>, chain: ChainId, index: u32) -> Result<Self> {
        let hash = hash.into();
        if hash.trim().is_empty() {
            return Err(Error::InvalidAddress("empty address".to_string()));
        }
        Ok(Self { hash, chain, index })
    }
}
