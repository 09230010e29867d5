#![allow(dead_code)]

use mirror_core::{
    AddressDeriver, ChainId, ChainTransaction, DerivedAddress, HdWatchWallet, TxInput, TxOutput,
    TxState, UtxoKey, WalletHandle, WalletId, WalletKind, WatchOnlyWallet,
};
use mirror_storage_sqlite::{AddressRecord, Database, Repository, WalletRecord};
use std::sync::Arc;

pub fn watch_only(db: &Database, id: &str, addresses: &[&str]) -> WalletHandle {
    let id = WalletId::new(id);
    let repo = Repository::new(db);
    repo.create_wallet(&WalletRecord::new(id.clone(), id.as_str(), WalletKind::WatchOnly))
        .unwrap();
    for hash in addresses {
        repo.insert_address(&AddressRecord {
            wallet_id: id.clone(),
            hash: hash.to_string(),
            chain: None,
            derivation_index: None,
            used: false,
        })
        .unwrap();
    }
    WalletHandle::WatchOnly(WatchOnlyWallet::new(id))
}

pub struct PrefixDeriver(pub String);

impl AddressDeriver for PrefixDeriver {
    fn derive(&self, chain: ChainId, index: u32) -> mirror_core::Result<DerivedAddress> {
        DerivedAddress::new(format!("{}_{}_{}", self.0, chain, index), chain, index)
    }
}

pub fn hd_watch(db: &Database, id: &str, gap_limit: u32) -> WalletHandle {
    let id = WalletId::new(id);
    Repository::new(db)
        .create_wallet(&WalletRecord::new(id.clone(), id.as_str(), WalletKind::HdWatch))
        .unwrap();
    let deriver: Arc<dyn AddressDeriver> = Arc::new(PrefixDeriver(id.as_str().to_string()));
    WalletHandle::HdWatch(HdWatchWallet::new(id, deriver, gap_limit))
}

/// Address `index` on the external chain of an HD test wallet
pub fn hd_address(wallet: &str, index: u32) -> String {
    format!("{}_{}_{}", wallet, ChainId::External, index)
}

/// Payment from an address outside every test wallet
pub fn fund(hash: &str, to: &str, amount: u64) -> ChainTransaction {
    ChainTransaction {
        hash: hash.to_string(),
        state: TxState::Pending,
        block: None,
        ordinal: None,
        last_update: 0,
        inputs: vec![TxInput {
            address: "faucet".to_string(),
            tx_hash: format!("{}_funding", hash),
            output_index: 0,
            amount,
            assets: vec![],
        }],
        outputs: vec![TxOutput {
            address: to.to_string(),
            amount,
            assets: vec![],
        }],
    }
}

/// Spend one output held at `from`, paying `outputs`
pub fn spend(
    hash: &str,
    from: &str,
    spent: &UtxoKey,
    amount: u64,
    outputs: &[(&str, u64)],
) -> ChainTransaction {
    ChainTransaction {
        hash: hash.to_string(),
        state: TxState::Pending,
        block: None,
        ordinal: None,
        last_update: 0,
        inputs: vec![TxInput {
            address: from.to_string(),
            tx_hash: spent.tx_hash.clone(),
            output_index: spent.output_index,
            amount,
            assets: vec![],
        }],
        outputs: outputs
            .iter()
            .map(|(address, amount)| TxOutput {
                address: address.to_string(),
                amount: *amount,
                assets: vec![],
            })
            .collect(),
    }
}
