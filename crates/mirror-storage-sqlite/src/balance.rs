//! Balance aggregator
//!
//! Balances are summed from the materialized UTXO set on every call, inside
//! one read transaction, so a reader never sees a half-applied pass.

use crate::repository::{amount_from_sql, DEFAULT_TOKEN_ID};
use crate::{Database, Error, Result};
use mirror_core::WalletId;
use mirror_params::Network;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-token balance of a wallet
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    amounts: BTreeMap<String, u128>,
}

impl Balance {
    /// Amount of a token (zero if absent)
    pub fn get(&self, token: &str) -> u128 {
        self.amounts.get(token).copied().unwrap_or(0)
    }

    /// Amount of the native currency
    pub fn default_amount(&self) -> u128 {
        self.get(DEFAULT_TOKEN_ID)
    }

    /// Token identifier to amount; the native currency is keyed by `""`
    pub fn amounts(&self) -> &BTreeMap<String, u128> {
        &self.amounts
    }

    /// Native amount formatted with the network's decimals
    pub fn format_default(&self, network: &Network) -> String {
        network.format_default_amount(self.default_amount())
    }

    fn add(&mut self, token: String, amount: u64) -> Result<()> {
        let entry = self.amounts.entry(token).or_insert(0);
        *entry = entry.checked_add(amount as u128).ok_or_else(|| {
            Error::Core(mirror_core::Error::AmountOverflow(
                "balance exceeds u128".to_string(),
            ))
        })?;
        Ok(())
    }
}

/// Sum the wallet's UTXOs per token in a single read snapshot.
///
/// The native currency is always present, possibly as zero.
pub fn get_balance(db: &mut Database, wallet: &WalletId) -> Result<Balance> {
    let tx = db.read_transaction()?;

    let exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM wallets WHERE id = ?1)",
        [wallet.as_str()],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(Error::NotFound(format!("wallet {}", wallet)));
    }

    let mut balance = Balance::default();
    balance.amounts.insert(DEFAULT_TOKEN_ID.to_string(), 0);

    {
        let mut stmt = tx.prepare(
            r#"
            SELECT a.token_id, a.amount
            FROM utxo_assets a
            JOIN utxos u
              ON u.wallet_id = a.wallet_id
             AND u.tx_hash = a.tx_hash
             AND u.output_index = a.output_index
            JOIN addresses ad
              ON ad.wallet_id = u.wallet_id AND ad.hash = u.address
            WHERE a.wallet_id = ?1
            "#,
        )?;
        let mut rows = stmt.query([wallet.as_str()])?;
        while let Some(row) = rows.next()? {
            let token: String = row.get(0)?;
            let amount = amount_from_sql(row.get(1)?)?;
            balance.add(token, amount)?;
        }
    }

    drop(tx);
    Ok(balance)
}
