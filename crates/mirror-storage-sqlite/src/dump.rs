//! Full-store export and restore
//!
//! A dump is the schema version plus every table as a list of JSON rows. It
//! is the unit of cross-version migration: an old dump is upgraded through
//! the ordered migration transforms before being loaded.

use crate::migrations::{self, SCHEMA_VERSION};
use crate::{Database, Error, Result};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One table row, column name to value
pub type DumpRow = serde_json::Map<String, Value>;

/// Dumped tables in insertion order, with the ordering used for export
const DUMP_TABLES: &[(&str, &str)] = &[
    ("wallets", "id"),
    ("addresses", "wallet_id, hash"),
    ("address_cutoffs", "wallet_id, chain"),
    ("blocks", "hash"),
    ("tokens", "identifier"),
    ("transactions", "wallet_id, hash"),
    ("utxos", "wallet_id, tx_hash, output_index"),
    ("utxo_assets", "wallet_id, tx_hash, output_index, token_id"),
    ("sync_cursors", "wallet_id"),
    ("utxo_safe_points", "wallet_id"),
];

/// Exported store contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDump {
    /// Schema version the rows conform to
    pub schema_version: i32,
    /// Table name to rows
    pub tables: BTreeMap<String, Vec<DumpRow>>,
}

impl StoreDump {
    /// Empty dump at a version
    pub fn new(schema_version: i32) -> Self {
        Self {
            schema_version,
            tables: BTreeMap::new(),
        }
    }

    /// Rows of a table (empty if absent)
    pub fn rows(&self, table: &str) -> &[DumpRow] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Mutable rows of a table, creating it if absent
    pub fn table_mut(&mut self, table: &str) -> &mut Vec<DumpRow> {
        self.tables.entry(table.to_string()).or_default()
    }

    /// Remove a table, returning its rows
    pub fn take_table(&mut self, table: &str) -> Vec<DumpRow> {
        self.tables.remove(table).unwrap_or_default()
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Export every table in a single read snapshot
pub fn export_dump(db: &mut Database) -> Result<StoreDump> {
    let version = migrations::get_schema_version(db.conn())?;
    let tx = db.read_transaction()?;

    let mut dump = StoreDump::new(version);
    for (table, order_by) in DUMP_TABLES {
        let mut stmt = tx.prepare(&format!("SELECT * FROM {} ORDER BY {}", table, order_by))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let rows = stmt.query_map([], |row| {
            let mut out = DumpRow::new();
            for (i, name) in columns.iter().enumerate() {
                out.insert(name.clone(), sql_to_json(row.get_ref(i)?));
            }
            Ok(out)
        })?;

        let rows = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        dump.tables.insert(table.to_string(), rows);
    }
    drop(tx);

    tracing::debug!(
        "Exported dump v{} ({} tables)",
        dump.schema_version,
        dump.tables.len()
    );
    Ok(dump)
}

/// Upgrade a dump to the current schema and load it into an empty store.
///
/// Everything is inserted in one transaction; on any error the store is
/// left empty.
pub fn restore_dump(db: &mut Database, mut dump: StoreDump) -> Result<()> {
    let original_version = dump.schema_version;
    migrations::upgrade_dump(&mut dump)?;

    for name in dump.tables.keys() {
        if !DUMP_TABLES.iter().any(|(table, _)| table == name) {
            return Err(Error::Migration(format!(
                "dump contains unknown table '{}' at v{}",
                name, SCHEMA_VERSION
            )));
        }
    }

    let tx = db.transaction()?;

    let wallets: i64 = tx.query_row("SELECT COUNT(*) FROM wallets", [], |row| row.get(0))?;
    let blocks: i64 = tx.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
    if wallets > 0 || blocks > 0 {
        return Err(Error::Validation(
            "restore requires an empty store".to_string(),
        ));
    }

    // The fresh schema seeds the default token; the dump carries its own
    tx.execute("DELETE FROM tokens", [])?;

    for (table, _) in DUMP_TABLES {
        let columns = table_columns(&tx, table)?;
        for row in dump.rows(table) {
            insert_row(&tx, table, &columns, row)?;
        }
    }

    tx.commit()?;

    tracing::info!(
        "Restored dump (v{} upgraded to v{})",
        original_version,
        SCHEMA_VERSION
    );
    Ok(())
}

/// Column names of a table in the live schema
fn table_columns(conn: &rusqlite::Connection, table: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>("name"))?;
    Ok(names.collect::<std::result::Result<BTreeSet<_>, _>>()?)
}

fn insert_row(
    conn: &rusqlite::Connection,
    table: &str,
    known: &BTreeSet<String>,
    row: &DumpRow,
) -> Result<()> {
    if row.is_empty() {
        return Ok(());
    }
    if let Some(unknown) = row.keys().find(|key| !known.contains(*key)) {
        return Err(Error::Migration(format!(
            "dump row of table '{}' has unknown column '{}'",
            table, unknown
        )));
    }
    let columns: Vec<&str> = row.keys().map(String::as_str).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );

    let values = row
        .values()
        .map(json_to_sql)
        .collect::<Result<Vec<SqlValue>>>()?;
    conn.execute(&sql, rusqlite::params_from_iter(values))?;
    Ok(())
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::from(hex::encode(b)),
    }
}

fn json_to_sql(value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => SqlValue::Integer(i),
            (None, Some(f)) => SqlValue::Real(f),
            _ => {
                return Err(Error::Validation(format!(
                    "number {} does not fit a column",
                    n
                )))
            }
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => {
            return Err(Error::Validation(
                "nested values are not valid column data".to_string(),
            ))
        }
    })
}
