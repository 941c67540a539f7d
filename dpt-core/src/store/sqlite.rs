use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior, params};
use tracing::debug;

use crate::config::StoreSection;
use crate::error::StoreError;
use crate::types::StoreStats;

use super::schema;

/// SQLite-backed provenance store.
///
/// One connection per store, guarded by a mutex; share the store across
/// threads with `Arc`. Separate processes open their own store on the same
/// file and are serialized by `SQLite`'s locking.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path, busy_timeout: Duration) -> crate::error::Result<Self> {
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;
        conn.busy_timeout(busy_timeout).map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        debug!(path = %path.display(), "Opened provenance store");
        Ok(store)
    }

    /// Open the store described by a `[store]` config section.
    pub fn open_with_config(config: &StoreSection) -> crate::error::Result<Self> {
        Self::open(&config.path, Duration::from_millis(config.busy_timeout_ms))
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> crate::error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> crate::error::Result<()> {
        let conn = self.lock();

        conn.execute_batch(schema::PRAGMAS_SQL)
            .map_err(StoreError::Sqlite)?;

        // WAL lets readers proceed while a writer holds the lock; ignored for in-memory.
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");

        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(StoreError::Sqlite)?;

        conn.execute(
            "INSERT OR IGNORE INTO dpt_meta (key, value) VALUES ('schema_version', ?1)",
            params![schema::SCHEMA_VERSION],
        )
        .map_err(StoreError::Sqlite)?;

        Ok(())
    }

    /// A panic while holding the lock cannot leave a transaction open (it
    /// rolls back on drop), so a poisoned connection is still usable.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` inside a deferred transaction; commit on `Ok`, roll back on `Err`.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> crate::error::Result<T>,
    ) -> crate::error::Result<T> {
        self.run_transaction(TransactionBehavior::Deferred, f)
    }

    /// Run `f` inside a transaction that takes the write lock up front.
    ///
    /// Check-then-insert sequences use this so that two writers cannot both
    /// observe "missing" and then both insert.
    pub fn with_immediate_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> crate::error::Result<T>,
    ) -> crate::error::Result<T> {
        self.run_transaction(TransactionBehavior::Immediate, f)
    }

    fn run_transaction<T>(
        &self,
        behavior: TransactionBehavior,
        f: impl FnOnce(&Transaction<'_>) -> crate::error::Result<T>,
    ) -> crate::error::Result<T> {
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(behavior)
            .map_err(StoreError::Sqlite)?;
        // Dropping `tx` on the error path rolls it back.
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::Sqlite)?;
        Ok(value)
    }

    /// Run a read-only closure against the connection.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> crate::error::Result<T>,
    ) -> crate::error::Result<T> {
        let conn = self.lock();
        f(&conn)
    }

    /// Get row counts for every table.
    pub fn stats(&self) -> crate::error::Result<StoreStats> {
        self.read(|conn| {
            #[allow(clippy::cast_sign_loss)]
            let count = |table: &str| -> rusqlite::Result<u64> {
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get::<_, i64>(0)
                })
                .map(|n| n as u64)
            };
            Ok(StoreStats {
                facts: count("facts").map_err(StoreError::Sqlite)?,
                environments: count("environments").map_err(StoreError::Sqlite)?,
                invocations: count("invocations").map_err(StoreError::Sqlite)?,
                data_products: count("data_products").map_err(StoreError::Sqlite)?,
                dependencies: count("dependencies").map_err(StoreError::Sqlite)?,
            })
        })
    }
}

/// Current time in the store's timestamp format.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Parse the RFC 3339 timestamp read from column `idx` of a row.
pub(crate) fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Comma-separated `(?, ?, …)` groups for a multi-row `VALUES` clause.
pub(crate) fn values_placeholders(rows: usize, columns: usize) -> String {
    let group = format!("({})", vec!["?"; columns].join(", "));
    vec![group; rows].join(", ")
}
