//! Database schema migrations
//!
//! Each step is keyed by the version it upgrades from. A step carries both
//! the SQL upgrade for a live database and the equivalent transform for an
//! exported dump, so `restore_dump` can bring an old dump up to date
//! without going through an old binary.

use crate::dump::{DumpRow, StoreDump};
use crate::{Error, Result};
use rusqlite::Connection;
use serde_json::Value;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 5;

/// What a migration does to chain-derived data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationKind {
    /// Schema and data are upgraded in place
    Schema,
    /// Chain-derived data cannot be upgraded and is wiped for a full resync
    WipeChainState,
}

/// One ordered upgrade step
pub struct Migration {
    /// Version this step upgrades from (to `from_version + 1`)
    pub from_version: i32,
    /// Human-readable summary
    pub description: &'static str,
    /// Effect on chain-derived data
    pub kind: MigrationKind,
    /// Upgrade a live database
    pub upgrade: fn(&Connection) -> Result<()>,
    /// Upgrade an exported dump
    pub transform: fn(&mut StoreDump) -> Result<()>,
}

/// All migrations, ordered by `from_version`
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        from_version: 0,
        description: "core ledger tables",
        kind: MigrationKind::Schema,
        upgrade: upgrade_v0,
        transform: transform_v0,
    },
    Migration {
        from_version: 1,
        description: "per-wallet UTXO safe points",
        kind: MigrationKind::Schema,
        upgrade: upgrade_v1,
        transform: transform_v1,
    },
    Migration {
        from_version: 2,
        description: "address cutoffs move out of wallet_meta",
        kind: MigrationKind::Schema,
        upgrade: upgrade_v2,
        transform: transform_v2,
    },
    Migration {
        from_version: 3,
        description: "separate UTXO pointer and history cursor",
        kind: MigrationKind::Schema,
        upgrade: upgrade_v3,
        transform: transform_v3,
    },
    Migration {
        from_version: 4,
        description: "per-output asset lists in stored transactions",
        kind: MigrationKind::WipeChainState,
        upgrade: no_schema_change,
        transform: no_dump_change,
    },
];

/// Chain-derived tables, children first
pub(crate) const CHAIN_STATE_TABLES: &[&str] = &[
    "utxo_assets",
    "utxos",
    "utxo_safe_points",
    "transactions",
    "sync_cursors",
    "blocks",
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    tracing::debug!(
        "Running migrations: current_version={}, target_version={}",
        current_version,
        SCHEMA_VERSION
    );

    if current_version > SCHEMA_VERSION {
        return Err(Error::IncompatibleVersion {
            found: current_version,
            supported: SCHEMA_VERSION,
        });
    }

    for migration in pending_migrations(current_version) {
        let tx = conn.unchecked_transaction()?;
        (migration.upgrade)(&tx)?;
        if migration.kind == MigrationKind::WipeChainState {
            wipe_chain_state(&tx)?;
        }
        set_schema_version(&tx, migration.from_version + 1)?;
        tx.commit()?;

        match migration.kind {
            MigrationKind::Schema => tracing::debug!(
                "Applied migration v{} -> v{}: {}",
                migration.from_version,
                migration.from_version + 1,
                migration.description
            ),
            MigrationKind::WipeChainState => tracing::info!(
                "Applied migration v{} -> v{}: {} (chain state wiped, full resync required)",
                migration.from_version,
                migration.from_version + 1,
                migration.description
            ),
        }
    }

    Ok(())
}

/// Bring a dump up to `SCHEMA_VERSION`
pub fn upgrade_dump(dump: &mut StoreDump) -> Result<()> {
    if dump.schema_version > SCHEMA_VERSION {
        return Err(Error::IncompatibleVersion {
            found: dump.schema_version,
            supported: SCHEMA_VERSION,
        });
    }

    for migration in pending_migrations(dump.schema_version) {
        (migration.transform)(dump)?;
        if migration.kind == MigrationKind::WipeChainState {
            for table in CHAIN_STATE_TABLES {
                dump.table_mut(table).clear();
            }
        }
        dump.schema_version = migration.from_version + 1;
    }

    Ok(())
}

fn pending_migrations(current_version: i32) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS
        .iter()
        .filter(move |m| m.from_version >= current_version)
}

/// Read the on-disk schema version (0 for a fresh database)
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    let result = conn.query_row(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
        [],
        |row| row.get(0),
    );

    match result {
        Ok(v) => Ok(v),
        Err(_) => Ok(0),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Delete every chain-derived row, keeping wallets, addresses, cutoffs and tokens
pub(crate) fn wipe_chain_state(conn: &Connection) -> Result<()> {
    for table in CHAIN_STATE_TABLES {
        conn.execute(&format!("DELETE FROM {}", table), [])?;
    }
    Ok(())
}

fn upgrade_v0(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE wallets (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('watch_only', 'hd_watch', 'hd_spending')),
            created_at INTEGER NOT NULL
        );

        CREATE TABLE addresses (
            wallet_id TEXT NOT NULL REFERENCES wallets(id) ON DELETE CASCADE,
            hash TEXT NOT NULL,
            chain INTEGER CHECK (chain IN (0, 1)),
            derivation_index INTEGER,
            used INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (wallet_id, hash),
            UNIQUE (wallet_id, chain, derivation_index)
        );

        CREATE TABLE wallet_meta (
            wallet_id TEXT NOT NULL REFERENCES wallets(id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (wallet_id, key)
        );

        CREATE TABLE blocks (
            hash TEXT PRIMARY KEY,
            height INTEGER NOT NULL,
            epoch INTEGER NOT NULL,
            slot INTEGER NOT NULL,
            time INTEGER NOT NULL
        );

        CREATE TABLE tokens (
            identifier TEXT PRIMARY KEY,
            policy_id TEXT NOT NULL,
            name TEXT NOT NULL,
            decimals INTEGER,
            is_default INTEGER NOT NULL DEFAULT 0
        );

        CREATE UNIQUE INDEX idx_tokens_single_default ON tokens(is_default) WHERE is_default = 1;

        INSERT INTO tokens (identifier, policy_id, name, decimals, is_default)
        VALUES ('', '', '', NULL, 1);

        CREATE TABLE transactions (
            wallet_id TEXT NOT NULL REFERENCES wallets(id) ON DELETE CASCADE,
            hash TEXT NOT NULL,
            state TEXT NOT NULL CHECK (state IN ('Pending', 'Successful', 'Failed')),
            block_hash TEXT REFERENCES blocks(hash),
            ordinal INTEGER,
            last_update INTEGER NOT NULL,
            inputs TEXT NOT NULL,
            outputs TEXT NOT NULL,
            PRIMARY KEY (wallet_id, hash),
            CHECK ((state = 'Successful') = (block_hash IS NOT NULL AND ordinal IS NOT NULL)),
            CHECK (state = 'Successful' OR (block_hash IS NULL AND ordinal IS NULL))
        );

        CREATE TABLE utxos (
            wallet_id TEXT NOT NULL,
            tx_hash TEXT NOT NULL,
            output_index INTEGER NOT NULL,
            address TEXT NOT NULL,
            PRIMARY KEY (wallet_id, tx_hash, output_index),
            FOREIGN KEY (wallet_id, address) REFERENCES addresses(wallet_id, hash) ON DELETE CASCADE
        );

        CREATE TABLE utxo_assets (
            wallet_id TEXT NOT NULL,
            tx_hash TEXT NOT NULL,
            output_index INTEGER NOT NULL,
            token_id TEXT NOT NULL REFERENCES tokens(identifier),
            amount INTEGER NOT NULL CHECK (amount >= 0),
            PRIMARY KEY (wallet_id, tx_hash, output_index, token_id),
            FOREIGN KEY (wallet_id, tx_hash, output_index)
                REFERENCES utxos(wallet_id, tx_hash, output_index) ON DELETE CASCADE
        );

        CREATE TABLE sync_cursors (
            wallet_id TEXT PRIMARY KEY REFERENCES wallets(id) ON DELETE CASCADE,
            last_block_hash TEXT REFERENCES blocks(hash),
            last_height INTEGER,
            last_slot INTEGER,
            last_sync_time INTEGER NOT NULL
        );

        CREATE INDEX idx_transactions_block ON transactions(block_hash);
        CREATE INDEX idx_utxos_address ON utxos(wallet_id, address);
        CREATE INDEX idx_blocks_height ON blocks(height);
        "#,
    )
    .map_err(|e| Error::Migration(e.to_string()))?;

    Ok(())
}

fn upgrade_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE utxo_safe_points (
            wallet_id TEXT PRIMARY KEY REFERENCES wallets(id) ON DELETE CASCADE,
            block_hash TEXT NOT NULL REFERENCES blocks(hash),
            height INTEGER NOT NULL,
            utxos TEXT NOT NULL
        );
        "#,
    )
    .map_err(|e| Error::Migration(e.to_string()))?;

    Ok(())
}

fn upgrade_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE address_cutoffs (
            wallet_id TEXT NOT NULL REFERENCES wallets(id) ON DELETE CASCADE,
            chain INTEGER NOT NULL CHECK (chain IN (0, 1)),
            cutoff INTEGER NOT NULL,
            PRIMARY KEY (wallet_id, chain)
        );

        INSERT INTO address_cutoffs (wallet_id, chain, cutoff)
        SELECT wallet_id,
               CASE key WHEN 'cutoff:external' THEN 0 ELSE 1 END,
               CAST(value AS INTEGER)
        FROM wallet_meta
        WHERE key IN ('cutoff:external', 'cutoff:internal');

        DROP TABLE wallet_meta;

        CREATE INDEX idx_addresses_used ON addresses(wallet_id, chain, used);
        "#,
    )
    .map_err(|e| Error::Migration(e.to_string()))?;

    Ok(())
}

fn upgrade_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        ALTER TABLE sync_cursors ADD COLUMN utxo_block_hash TEXT;
        ALTER TABLE sync_cursors ADD COLUMN history_block_hash TEXT;
        ALTER TABLE sync_cursors ADD COLUMN history_tx_hash TEXT;

        UPDATE sync_cursors SET utxo_block_hash = last_block_hash;
        "#,
    )
    .map_err(|e| Error::Migration(e.to_string()))?;

    Ok(())
}

fn no_schema_change(_conn: &Connection) -> Result<()> {
    Ok(())
}

fn transform_v0(dump: &mut StoreDump) -> Result<()> {
    for table in [
        "wallets",
        "addresses",
        "wallet_meta",
        "blocks",
        "transactions",
        "utxos",
        "utxo_assets",
        "sync_cursors",
    ] {
        dump.table_mut(table);
    }

    let tokens = dump.table_mut("tokens");
    if !tokens.iter().any(|row| row.get("is_default") == Some(&Value::from(1))) {
        let mut row = DumpRow::new();
        row.insert("identifier".into(), Value::from(""));
        row.insert("policy_id".into(), Value::from(""));
        row.insert("name".into(), Value::from(""));
        row.insert("decimals".into(), Value::Null);
        row.insert("is_default".into(), Value::from(1));
        tokens.insert(0, row);
    }
    Ok(())
}

fn transform_v1(dump: &mut StoreDump) -> Result<()> {
    dump.table_mut("utxo_safe_points");
    Ok(())
}

fn transform_v2(dump: &mut StoreDump) -> Result<()> {
    let meta = dump.take_table("wallet_meta");
    let cutoffs = dump.table_mut("address_cutoffs");

    for row in meta {
        let chain = match row.get("key").and_then(Value::as_str) {
            Some("cutoff:external") => 0,
            Some("cutoff:internal") => 1,
            _ => continue,
        };
        let cutoff = row
            .get("value")
            .and_then(Value::as_str)
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| Error::Migration("wallet_meta cutoff is not an integer".to_string()))?;

        let mut out = DumpRow::new();
        out.insert(
            "wallet_id".into(),
            row.get("wallet_id").cloned().unwrap_or(Value::Null),
        );
        out.insert("chain".into(), Value::from(chain));
        out.insert("cutoff".into(), Value::from(cutoff));
        cutoffs.push(out);
    }
    Ok(())
}

fn transform_v3(dump: &mut StoreDump) -> Result<()> {
    for row in dump.table_mut("sync_cursors") {
        let last = row.get("last_block_hash").cloned().unwrap_or(Value::Null);
        row.insert("utxo_block_hash".into(), last);
        row.insert("history_block_hash".into(), Value::Null);
        row.insert("history_tx_hash".into(), Value::Null);
    }
    Ok(())
}

fn no_dump_change(_dump: &mut StoreDump) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_contiguous() {
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.from_version, i as i32);
        }
        assert_eq!(MIGRATIONS.len() as i32, SCHEMA_VERSION);
    }

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let default_tokens: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM tokens WHERE is_default = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(default_tokens, 1);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();
        assert!(matches!(
            run_migrations(&conn),
            Err(Error::IncompatibleVersion { .. })
        ));
    }

    #[test]
    fn test_v2_moves_cutoffs() {
        let conn = Connection::open_in_memory().unwrap();
        for migration in &MIGRATIONS[..2] {
            (migration.upgrade)(&conn).unwrap();
        }
        set_schema_version(&conn, 2).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO wallets (id, name, kind, created_at) VALUES ('w1', 'main', 'hd_watch', 0);
            INSERT INTO wallet_meta (wallet_id, key, value) VALUES ('w1', 'cutoff:external', '7');
            INSERT INTO wallet_meta (wallet_id, key, value) VALUES ('w1', 'theme', 'dark');
            "#,
        )
        .unwrap();

        run_migrations(&conn).unwrap();

        let cutoff: i64 = conn
            .query_row(
                "SELECT cutoff FROM address_cutoffs WHERE wallet_id = 'w1' AND chain = 0",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(cutoff, 7);

        let meta_exists: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'wallet_meta'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(meta_exists, 0);
    }
}
