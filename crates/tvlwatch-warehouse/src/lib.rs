//! # tvlwatch Warehouse
//!
//! DuckDB-backed durable tier for the tvlwatch client.
//!
//! ## Overview
//!
//! One local database file holds every piece of state that must survive a
//! restart:
//!
//! | Table | Description |
//! |-------|-------------|
//! | `cache_entries` | Raw cached payloads keyed by `(store, key)` |
//! | `cache_metadata` | Expiry records keyed by `{store}_{key}` |
//! | `history_snapshots` | Latest historical series per id and resolution |
//! | `settings` | Persisted local settings (base URL, credential) |
//! | `schema_migrations` | Applied schema versions |
//!
//! A cached value and its metadata record are always written and deleted in
//! the same transaction, so readers observe either both or neither.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tvlwatch_warehouse::{Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::default())?;
//!     warehouse.put_cache_entry("symbols", "Aggregate", "[]", 0, 60_000)?;
//!     assert_eq!(
//!         warehouse.get_cache_value("symbols", "Aggregate")?.as_deref(),
//!         Some("[]")
//!     );
//!     Ok(())
//! }
//! ```

pub mod duckdb;
pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{Connection, ToSql};
use thiserror::Error;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for tvlwatch data.
    pub tvlwatch_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::in_home(resolve_tvlwatch_home())
    }
}

impl WarehouseConfig {
    /// Configuration rooted at an explicit home directory.
    pub fn in_home(tvlwatch_home: impl Into<PathBuf>) -> Self {
        let tvlwatch_home = tvlwatch_home.into();
        let db_path = tvlwatch_home.join("cache").join("tvlwatch.duckdb");
        Self {
            tvlwatch_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// Expiry record paired with a cached value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetadata {
    pub store: String,
    pub key: String,
    /// Write time, Unix epoch milliseconds.
    pub timestamp_ms: i64,
    /// Expiry time, Unix epoch milliseconds.
    pub expiry_ms: i64,
}

/// Stored historical series payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySnapshot {
    pub series_id: String,
    pub resolution: String,
    /// JSON text of the series.
    pub payload: String,
    pub written_at_ms: i64,
}

/// The durable storage interface for tvlwatch.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
}

impl std::fmt::Debug for Warehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Warehouse")
            .field("db_path", &self.config.db_path)
            .finish_non_exhaustive()
    }
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a warehouse with the specified configuration.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self { config, manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply pending schema migrations.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Get the path to the database file.
    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    /// Root directory this warehouse was opened under.
    pub fn home(&self) -> &Path {
        self.config.tvlwatch_home.as_path()
    }

    /// Schema versions applied to this database.
    pub fn schema_versions(&self) -> Result<Vec<String>, WarehouseError> {
        let connection = self.manager.acquire()?;
        Ok(migrations::applied_versions(&connection)?)
    }

    /// Write a cached value together with its metadata record.
    ///
    /// Both rows are replaced in one transaction (last write wins).
    pub fn put_cache_entry(
        &self,
        store: &str,
        key: &str,
        value: &str,
        timestamp_ms: i64,
        expiry_ms: i64,
    ) -> Result<(), WarehouseError> {
        let id = metadata_id(store, key);
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            let params: [&dyn ToSql; 3] = [&store, &key, &value];
            connection.execute(
                "INSERT OR REPLACE INTO cache_entries (store, key, value) VALUES (?, ?, ?)",
                params.as_slice(),
            )?;

            let params: [&dyn ToSql; 5] = [&id, &store, &key, &timestamp_ms, &expiry_ms];
            connection.execute(
                "INSERT OR REPLACE INTO cache_metadata \
                 (id, store, key, timestamp_ms, expiry_ms) VALUES (?, ?, ?, ?, ?)",
                params.as_slice(),
            )?;
            Ok(())
        })();

        finalize_transaction(&connection, result)
    }

    /// Read a cached value without consulting its metadata.
    pub fn get_cache_value(&self, store: &str, key: &str) -> Result<Option<String>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 2] = [&store, &key];
        let mut statement =
            connection.prepare("SELECT value FROM cache_entries WHERE store = ? AND key = ?")?;
        let mut rows = statement.query(params.as_slice())?;
        let value = match rows.next()? {
            Some(row) => Some(row.get(0)?),
            None => None,
        };
        Ok(value)
    }

    /// Read the metadata record for a cached value.
    pub fn get_cache_metadata(
        &self,
        store: &str,
        key: &str,
    ) -> Result<Option<CacheMetadata>, WarehouseError> {
        let id = metadata_id(store, key);
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 1] = [&id];
        let mut statement = connection.prepare(
            "SELECT store, key, timestamp_ms, expiry_ms FROM cache_metadata WHERE id = ?",
        )?;
        let mut rows = statement.query(params.as_slice())?;
        let metadata = match rows.next()? {
            Some(row) => Some(CacheMetadata {
                store: row.get(0)?,
                key: row.get(1)?,
                timestamp_ms: row.get(2)?,
                expiry_ms: row.get(3)?,
            }),
            None => None,
        };
        Ok(metadata)
    }

    /// Delete one cached value and its metadata. Returns whether anything was removed.
    pub fn delete_cache_entry(&self, store: &str, key: &str) -> Result<bool, WarehouseError> {
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = delete_pair(&connection, store, key);
        finalize_transaction(&connection, result)
    }

    /// Delete every entry whose expiry lies strictly before `now_ms`.
    ///
    /// Metadata is scanned once; each expired pair is removed in its own
    /// transaction so readers never see a value without its metadata. A pair
    /// rewritten after the scan keeps its fresh expiry and is left alone.
    pub fn delete_expired(&self, now_ms: i64) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let expired = scan_expired(&connection, now_ms)?;

        let mut removed = 0;
        for (store, key) in expired {
            connection.execute_batch("BEGIN TRANSACTION")?;
            let result = delete_pair_if_expired(&connection, &store, &key, now_ms);
            if finalize_transaction(&connection, result)? {
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Drop every cached value, metadata record and history snapshot.
    ///
    /// Settings are kept.
    pub fn clear_cache(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = connection
            .execute_batch(
                "DELETE FROM cache_entries; DELETE FROM cache_metadata; DELETE FROM history_snapshots;",
            )
            .map_err(WarehouseError::from);
        finalize_transaction(&connection, result)
    }

    /// Number of metadata records currently stored.
    pub fn cache_len(&self) -> Result<usize, WarehouseError> {
        let connection = self.manager.acquire()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM cache_metadata",
            [] as [&dyn ToSql; 0],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Replace the stored snapshot for `(series_id, resolution)`.
    pub fn put_history_snapshot(&self, snapshot: &HistorySnapshot) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 4] = [
            &snapshot.series_id,
            &snapshot.resolution,
            &snapshot.payload,
            &snapshot.written_at_ms,
        ];
        connection.execute(
            "INSERT OR REPLACE INTO history_snapshots \
             (series_id, resolution, payload, written_at_ms) VALUES (?, ?, ?, ?)",
            params.as_slice(),
        )?;
        Ok(())
    }

    pub fn get_history_snapshot(
        &self,
        series_id: &str,
        resolution: &str,
    ) -> Result<Option<HistorySnapshot>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 2] = [&series_id, &resolution];
        let mut statement = connection.prepare(
            "SELECT series_id, resolution, payload, written_at_ms FROM history_snapshots \
             WHERE series_id = ? AND resolution = ?",
        )?;
        let mut rows = statement.query(params.as_slice())?;
        let snapshot = match rows.next()? {
            Some(row) => Some(HistorySnapshot {
                series_id: row.get(0)?,
                resolution: row.get(1)?,
                payload: row.get(2)?,
                written_at_ms: row.get(3)?,
            }),
            None => None,
        };
        Ok(snapshot)
    }

    pub fn get_setting(&self, name: &str) -> Result<Option<String>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 1] = [&name];
        let mut statement = connection.prepare("SELECT value FROM settings WHERE name = ?")?;
        let mut rows = statement.query(params.as_slice())?;
        let value = match rows.next()? {
            Some(row) => Some(row.get(0)?),
            None => None,
        };
        Ok(value)
    }

    pub fn put_setting(&self, name: &str, value: &str) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 2] = [&name, &value];
        connection.execute(
            "INSERT OR REPLACE INTO settings (name, value, updated_at) \
             VALUES (?, ?, CURRENT_TIMESTAMP)",
            params.as_slice(),
        )?;
        Ok(())
    }

    pub fn remove_setting(&self, name: &str) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 1] = [&name];
        connection.execute("DELETE FROM settings WHERE name = ?", params.as_slice())?;
        Ok(())
    }
}

/// Metadata record key for a cached value.
///
/// Store names must not contain `_`: `("a_b", "c")` and `("a", "b_c")` would
/// share an id.
pub fn metadata_id(store: &str, key: &str) -> String {
    debug_assert!(!store.contains('_'), "cache store name `{store}` contains `_`");
    format!("{store}_{key}")
}

fn scan_expired(
    connection: &Connection,
    now_ms: i64,
) -> Result<Vec<(String, String)>, WarehouseError> {
    let params: [&dyn ToSql; 1] = [&now_ms];
    let mut statement =
        connection.prepare("SELECT store, key FROM cache_metadata WHERE expiry_ms < ?")?;
    let mut rows = statement.query(params.as_slice())?;
    let mut expired = Vec::new();
    while let Some(row) = rows.next()? {
        expired.push((row.get(0)?, row.get(1)?));
    }
    Ok(expired)
}

/// Remove the pair only while its metadata is still expired at `now_ms`.
fn delete_pair_if_expired(
    connection: &Connection,
    store: &str,
    key: &str,
    now_ms: i64,
) -> Result<bool, WarehouseError> {
    let id = metadata_id(store, key);
    let params: [&dyn ToSql; 2] = [&id, &now_ms];
    let records = connection.execute(
        "DELETE FROM cache_metadata WHERE id = ? AND expiry_ms < ?",
        params.as_slice(),
    )?;
    if records == 0 {
        return Ok(false);
    }

    let params: [&dyn ToSql; 2] = [&store, &key];
    connection.execute(
        "DELETE FROM cache_entries WHERE store = ? AND key = ?",
        params.as_slice(),
    )?;
    Ok(true)
}

fn delete_pair(connection: &Connection, store: &str, key: &str) -> Result<bool, WarehouseError> {
    let id = metadata_id(store, key);
    let params: [&dyn ToSql; 2] = [&store, &key];
    let values = connection.execute(
        "DELETE FROM cache_entries WHERE store = ? AND key = ?",
        params.as_slice(),
    )?;
    let params: [&dyn ToSql; 1] = [&id];
    let records = connection.execute("DELETE FROM cache_metadata WHERE id = ?", params.as_slice())?;
    Ok(values + records > 0)
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// Resolve the tvlwatch home directory from environment or default.
pub fn resolve_tvlwatch_home() -> PathBuf {
    if let Some(path) = env::var_os("TVLWATCH_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".tvlwatch");
    }

    PathBuf::from(".tvlwatch")
}
