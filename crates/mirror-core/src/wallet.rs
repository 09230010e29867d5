//! Wallet handles with static capability sets
//!
//! Each handle type implements exactly the capability traits it supports.
//! A handle that can hand out fresh addresses must be built with a deriver,
//! and a handle that can sign must be built with a signer, so capability
//! checks happen at construction time.

use crate::oracle::{AddressDeriver, TransactionSigner};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Stable wallet identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletId(String);

impl WalletId {
    /// Wrap an existing id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow as str
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WalletId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Persisted wallet kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletKind {
    /// Fixed address set, no derivation
    WatchOnly,
    /// Account public key: derives addresses, cannot sign
    HdWatch,
    /// Full HD wallet: derives and signs
    HdSpending,
}

impl WalletKind {
    /// Stable storage name
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WatchOnly => "watch_only",
            Self::HdWatch => "hd_watch",
            Self::HdSpending => "hd_spending",
        }
    }

    /// Parse from storage name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "watch_only" => Some(Self::WatchOnly),
            "hd_watch" => Some(Self::HdWatch),
            "hd_spending" => Some(Self::HdSpending),
            _ => None,
        }
    }

    /// Capabilities implied by this kind
    pub const fn capabilities(&self) -> CapabilitySet {
        match self {
            Self::WatchOnly => CapabilitySet {
                utxo: true,
                cutoff: false,
                signing: false,
            },
            Self::HdWatch => CapabilitySet {
                utxo: true,
                cutoff: true,
                signing: false,
            },
            Self::HdSpending => CapabilitySet {
                utxo: true,
                cutoff: true,
                signing: true,
            },
        }
    }
}

/// Capability flags, for display and persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    /// Can be synced and hold UTXOs
    pub utxo: bool,
    /// Can hand out fresh addresses
    pub cutoff: bool,
    /// Can sign transactions
    pub signing: bool,
}

/// Wallet whose UTXOs and history can be mirrored
pub trait UtxoCapable {
    /// Wallet id
    fn wallet_id(&self) -> &WalletId;
}

/// Wallet that can derive fresh addresses within a gap limit
pub trait CutoffCapable: UtxoCapable {
    /// Address deriver
    fn deriver(&self) -> &dyn AddressDeriver;
    /// Gap limit for each chain
    fn gap_limit(&self) -> u32;
}

/// Wallet that can sign
pub trait SigningCapable: UtxoCapable {
    /// Transaction signer
    fn signer(&self) -> &dyn TransactionSigner;
}

/// Watch-only wallet over a fixed address set
#[derive(Debug, Clone)]
pub struct WatchOnlyWallet {
    id: WalletId,
}

impl WatchOnlyWallet {
    /// Create handle
    pub fn new(id: WalletId) -> Self {
        Self { id }
    }
}

impl UtxoCapable for WatchOnlyWallet {
    fn wallet_id(&self) -> &WalletId {
        &self.id
    }
}

/// HD wallet without signing keys
#[derive(Clone)]
pub struct HdWatchWallet {
    id: WalletId,
    deriver: Arc<dyn AddressDeriver>,
    gap_limit: u32,
}

impl HdWatchWallet {
    /// Create handle
    pub fn new(id: WalletId, deriver: Arc<dyn AddressDeriver>, gap_limit: u32) -> Self {
        Self {
            id,
            deriver,
            gap_limit,
        }
    }
}

impl UtxoCapable for HdWatchWallet {
    fn wallet_id(&self) -> &WalletId {
        &self.id
    }
}

impl CutoffCapable for HdWatchWallet {
    fn deriver(&self) -> &dyn AddressDeriver {
        self.deriver.as_ref()
    }

    fn gap_limit(&self) -> u32 {
        self.gap_limit
    }
}

/// Full HD wallet
#[derive(Clone)]
pub struct HdSpendingWallet {
    id: WalletId,
    deriver: Arc<dyn AddressDeriver>,
    signer: Arc<dyn TransactionSigner>,
    gap_limit: u32,
}

impl HdSpendingWallet {
    /// Create handle
    pub fn new(
        id: WalletId,
        deriver: Arc<dyn AddressDeriver>,
        signer: Arc<dyn TransactionSigner>,
        gap_limit: u32,
    ) -> Self {
        Self {
            id,
            deriver,
            signer,
            gap_limit,
        }
    }
}

impl UtxoCapable for HdSpendingWallet {
    fn wallet_id(&self) -> &WalletId {
        &self.id
    }
}

impl CutoffCapable for HdSpendingWallet {
    fn deriver(&self) -> &dyn AddressDeriver {
        self.deriver.as_ref()
    }

    fn gap_limit(&self) -> u32 {
        self.gap_limit
    }
}

impl SigningCapable for HdSpendingWallet {
    fn signer(&self) -> &dyn TransactionSigner {
        self.signer.as_ref()
    }
}

/// Any wallet handle
#[derive(Clone)]
pub enum WalletHandle {
    /// Fixed address set
    WatchOnly(WatchOnlyWallet),
    /// Derives, cannot sign
    HdWatch(HdWatchWallet),
    /// Derives and signs
    HdSpending(HdSpendingWallet),
}

impl WalletHandle {
    /// Persisted kind
    pub fn kind(&self) -> WalletKind {
        match self {
            Self::WatchOnly(_) => WalletKind::WatchOnly,
            Self::HdWatch(_) => WalletKind::HdWatch,
            Self::HdSpending(_) => WalletKind::HdSpending,
        }
    }

    /// Borrow as cutoff-capable, if supported
    pub fn as_cutoff(&self) -> Result<&dyn CutoffCapable> {
        match self {
            Self::HdWatch(w) => Ok(w),
            Self::HdSpending(w) => Ok(w),
            Self::WatchOnly(w) => Err(Error::CapabilityMissing {
                wallet: w.id.to_string(),
                capability: "address cutoffs",
            }),
        }
    }

    /// Borrow as signing-capable, if supported
    pub fn as_signing(&self) -> Result<&dyn SigningCapable> {
        match self {
            Self::HdSpending(w) => Ok(w),
            other => Err(Error::CapabilityMissing {
                wallet: other.wallet_id().to_string(),
                capability: "signing",
            }),
        }
    }
}

impl UtxoCapable for WalletHandle {
    fn wallet_id(&self) -> &WalletId {
        match self {
            Self::WatchOnly(w) => w.wallet_id(),
            Self::HdWatch(w) => w.wallet_id(),
            Self::HdSpending(w) => w.wallet_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChainId, DerivedAddress};

    struct FixedDeriver;

    impl AddressDeriver for FixedDeriver {
        fn derive(&self, chain: ChainId, index: u32) -> Result<DerivedAddress> {
            DerivedAddress::new(format!("addr_{}_{}", chain, index), chain, index)
        }
    }

    #[test]
    fn test_watch_only_has_no_cutoff() {
        let handle = WalletHandle::WatchOnly(WatchOnlyWallet::new(WalletId::new("w1")));
        assert!(matches!(
            handle.as_cutoff(),
            Err(Error::CapabilityMissing { .. })
        ));
        assert!(handle.as_signing().is_err());
        assert_eq!(handle.kind(), WalletKind::WatchOnly);
    }

    #[test]
    fn test_hd_watch_derives() {
        let handle = WalletHandle::HdWatch(HdWatchWallet::new(
            WalletId::new("w2"),
            Arc::new(FixedDeriver),
            20,
        ));
        let cutoff = handle.as_cutoff().unwrap();
        let addr = cutoff.deriver().derive(ChainId::External, 3).unwrap();
        assert_eq!(addr.hash, "addr_external_3");
        assert!(handle.as_signing().is_err());
    }

    #[test]
    fn test_kind_capabilities() {
        assert!(!WalletKind::WatchOnly.capabilities().cutoff);
        assert!(WalletKind::HdSpending.capabilities().signing);
        assert_eq!(WalletKind::parse("hd_watch"), Some(WalletKind::HdWatch));
        assert_eq!(WalletKind::parse("bip44"), None);
    }
}
