//! Address cutoff manager
//!
//! Tracks, per HD chain, the highest derivation index handed out as an
//! unused address. Derivation itself goes through the wallet's
//! [`AddressDeriver`](mirror_core::AddressDeriver).

use crate::repository::Repository;
use crate::{AddressRecord, Database, Error, Result};
use mirror_core::{ChainId, CutoffCapable, CutoffWindow, UtxoCapable, WalletId};
use rusqlite::{params, Connection, OptionalExtension};

/// Cutoff manager over a connection or open transaction
pub struct AddressCutoffManager<'a> {
    conn: &'a Connection,
}

impl<'a> AddressCutoffManager<'a> {
    /// Create new cutoff manager
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Stored cutoff of a chain, `None` if nothing was handed out yet
    pub fn get_cutoff(&self, wallet: &WalletId, chain: ChainId) -> Result<Option<u32>> {
        Ok(self
            .conn
            .query_row(
                "SELECT cutoff FROM address_cutoffs WHERE wallet_id = ?1 AND chain = ?2",
                params![wallet.as_str(), chain.as_index()],
                |row| row.get::<_, u32>(0),
            )
            .optional()?)
    }

    /// Set the cutoff explicitly; it must lie inside the gap-limit window
    pub fn set_cutoff(&self, wallet: &dyn CutoffCapable, chain: ChainId, index: u32) -> Result<()> {
        let window = self.window(wallet, chain)?;
        window.check_cutoff(index)?;
        self.store_cutoff(wallet.wallet_id(), chain, index)
    }

    /// Current window of a chain
    pub fn window(&self, wallet: &dyn CutoffCapable, chain: ChainId) -> Result<CutoffWindow> {
        let id = wallet.wallet_id();
        Repository::on(self.conn).require_wallet(id)?;
        let highest_used = Repository::on(self.conn).highest_used_index(id, chain)?;
        let cutoff = self.get_cutoff(id, chain)?;
        Ok(CutoffWindow::new(chain, wallet.gap_limit(), highest_used, cutoff))
    }

    /// Hand out the next unused address and advance the cutoff.
    ///
    /// Fails with `NoUnusedAddresses` once `gap_limit` addresses past the
    /// highest used one have been handed out. Call inside a transaction, or
    /// use [`pop_next_address`].
    pub fn pop_next_address(
        &self,
        wallet: &dyn CutoffCapable,
        chain: ChainId,
    ) -> Result<AddressRecord> {
        let mut window = self.window(wallet, chain)?;
        let index = window.advance()?;
        let record = self.ensure_address(wallet, chain, index)?;
        self.store_cutoff(wallet.wallet_id(), chain, index)?;

        tracing::debug!(
            "Popped {} address {} for wallet {}",
            chain,
            index,
            wallet.wallet_id()
        );
        Ok(record)
    }

    /// Derive every address inside the window that is not recorded yet,
    /// without writing anything
    pub fn missing_in_window(
        &self,
        wallet: &dyn CutoffCapable,
        chain: ChainId,
    ) -> Result<Vec<AddressRecord>> {
        let window = self.window(wallet, chain)?;
        let max = match window.max_allowed_index() {
            Some(max) => max,
            None => return Ok(Vec::new()),
        };

        let recorded = Repository::on(self.conn).derivation_indices(wallet.wallet_id(), chain)?;
        (0..=max)
            .filter(|index| !recorded.contains(index))
            .map(|index| derive_record(wallet, chain, index))
            .collect()
    }

    /// Derive and record every missing address inside the window so that
    /// a sync pass can discover activity on them. Returns how many were new.
    pub fn derive_window(&self, wallet: &dyn CutoffCapable, chain: ChainId) -> Result<usize> {
        let missing = self.missing_in_window(wallet, chain)?;
        let repo = Repository::on(self.conn);
        for record in &missing {
            insert_derived(&repo, record)?;
        }

        if !missing.is_empty() {
            tracing::debug!(
                "Derived {} {} addresses for wallet {}",
                missing.len(),
                chain,
                wallet.wallet_id()
            );
        }
        Ok(missing.len())
    }

    fn ensure_address(
        &self,
        wallet: &dyn CutoffCapable,
        chain: ChainId,
        index: u32,
    ) -> Result<AddressRecord> {
        let repo = Repository::on(self.conn);
        if let Some(existing) = repo.address_at(wallet.wallet_id(), chain, index)? {
            return Ok(existing);
        }
        let record = derive_record(wallet, chain, index)?;
        insert_derived(&repo, &record)?;
        Ok(record)
    }

    fn store_cutoff(&self, wallet: &WalletId, chain: ChainId, index: u32) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO address_cutoffs (wallet_id, chain, cutoff)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (wallet_id, chain) DO UPDATE SET cutoff = excluded.cutoff
            "#,
            params![wallet.as_str(), chain.as_index(), index],
        )?;
        Ok(())
    }
}

/// Record a derived address; its hash must not be known at another position
fn insert_derived(repo: &Repository<'_>, record: &AddressRecord) -> Result<()> {
    if !repo.insert_address(record)? {
        return Err(Error::InvariantViolation(format!(
            "address {} of wallet {} is already recorded at another position",
            record.hash, record.wallet_id
        )));
    }
    Ok(())
}

fn derive_record(wallet: &dyn CutoffCapable, chain: ChainId, index: u32) -> Result<AddressRecord> {
    let derived = wallet.deriver().derive(chain, index)?;
    if derived.chain != chain || derived.index != index {
        return Err(Error::Validation(format!(
            "deriver returned {}/{} for requested {}/{}",
            derived.chain, derived.index, chain, index
        )));
    }
    Ok(AddressRecord {
        wallet_id: wallet.wallet_id().clone(),
        hash: derived.hash,
        chain: Some(chain),
        derivation_index: Some(index),
        used: false,
    })
}

/// Pop the next unused address in its own transaction
pub fn pop_next_address(
    db: &mut Database,
    wallet: &dyn CutoffCapable,
    chain: ChainId,
) -> Result<AddressRecord> {
    let tx = db.transaction()?;
    let record = AddressCutoffManager::new(&tx).pop_next_address(wallet, chain)?;
    tx.commit()?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WalletRecord;
    use mirror_core::{AddressDeriver, DerivedAddress, HdWatchWallet, WalletKind};
    use std::sync::Arc;

    struct PrefixDeriver;

    impl AddressDeriver for PrefixDeriver {
        fn derive(&self, chain: ChainId, index: u32) -> mirror_core::Result<DerivedAddress> {
            DerivedAddress::new(format!("addr_{}_{}", chain, index), chain, index)
        }
    }

    fn setup(gap_limit: u32) -> (Database, HdWatchWallet) {
        let db = Database::open_in_memory().unwrap();
        let wallet = HdWatchWallet::new(WalletId::new("hd"), Arc::new(PrefixDeriver), gap_limit);
        Repository::new(&db)
            .create_wallet(&WalletRecord {
                id: WalletId::new("hd"),
                name: "hd".to_string(),
                kind: WalletKind::HdWatch,
                created_at: 0,
            })
            .unwrap();
        (db, wallet)
    }

    #[test]
    fn test_pop_until_gap_limit() {
        let (mut db, wallet) = setup(3);
        for expected in 0..3 {
            let record = pop_next_address(&mut db, &wallet, ChainId::External).unwrap();
            assert_eq!(record.derivation_index, Some(expected));
            assert_eq!(record.hash, format!("addr_external_{}", expected));
        }
        let err = pop_next_address(&mut db, &wallet, ChainId::External).unwrap_err();
        assert!(matches!(
            err,
            Error::Core(mirror_core::Error::NoUnusedAddresses(_))
        ));

        let manager = AddressCutoffManager::new(db.conn());
        assert_eq!(manager.get_cutoff(wallet.wallet_id(), ChainId::External).unwrap(), Some(2));
        assert_eq!(manager.get_cutoff(wallet.wallet_id(), ChainId::Internal).unwrap(), None);
    }

    #[test]
    fn test_usage_reopens_window() {
        let (mut db, wallet) = setup(2);
        pop_next_address(&mut db, &wallet, ChainId::External).unwrap();
        pop_next_address(&mut db, &wallet, ChainId::External).unwrap();
        assert!(pop_next_address(&mut db, &wallet, ChainId::External).is_err());

        Repository::new(&db)
            .mark_addresses_used(wallet.wallet_id(), ["addr_external_1"])
            .unwrap();
        let record = pop_next_address(&mut db, &wallet, ChainId::External).unwrap();
        assert_eq!(record.derivation_index, Some(2));
    }

    #[test]
    fn test_set_cutoff_checks_window() {
        let (db, wallet) = setup(5);
        let manager = AddressCutoffManager::new(db.conn());
        manager.set_cutoff(&wallet, ChainId::Internal, 4).unwrap();
        assert_eq!(manager.get_cutoff(wallet.wallet_id(), ChainId::Internal).unwrap(), Some(4));
        assert!(manager.set_cutoff(&wallet, ChainId::Internal, 5).is_err());
    }

    #[test]
    fn test_missing_in_window_skips_recorded_indices() {
        let (db, wallet) = setup(4);
        let manager = AddressCutoffManager::new(db.conn());
        let repo = Repository::new(&db);
        for index in [0, 2] {
            repo.insert_address(&derive_record(&wallet, ChainId::External, index).unwrap())
                .unwrap();
        }
        let missing: Vec<Option<u32>> = manager
            .missing_in_window(&wallet, ChainId::External)
            .unwrap()
            .into_iter()
            .map(|record| record.derivation_index)
            .collect();
        assert_eq!(missing, vec![Some(1), Some(3)]);
        assert_eq!(
            repo.derivation_indices(wallet.wallet_id(), ChainId::External).unwrap(),
            [0, 2].into_iter().collect()
        );
    }

    #[test]
    fn test_derive_window_is_idempotent() {
        let (db, wallet) = setup(4);
        let manager = AddressCutoffManager::new(db.conn());
        assert_eq!(manager.derive_window(&wallet, ChainId::External).unwrap(), 4);
        assert_eq!(manager.derive_window(&wallet, ChainId::External).unwrap(), 0);
        // derivation does not hand addresses out
        assert_eq!(manager.get_cutoff(wallet.wallet_id(), ChainId::External).unwrap(), None);
    }
}
