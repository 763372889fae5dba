//! SQLite-backed durable record layer.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use gqlcache_core::{
    codec, CacheError, CacheHeaders, CacheResult, ChangedKeys, Record, RecordSet, StorageError,
};
use rusqlite::{params, Connection, OptionalExtension};

use crate::traits::{cascade_remove, merge_record, CacheDump, NormalizedCache};

/// Layer name reported in dumps.
pub const SQL_LAYER: &str = "sql";

/// Error type for SQLite cache operations.
#[derive(Debug, thiserror::Error)]
pub enum SqlCacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SqlCacheError> for CacheError {
    fn from(e: SqlCacheError) -> Self {
        CacheError::Storage(StorageError::Backend {
            backend: SQL_LAYER.to_string(),
            reason: e.to_string(),
        })
    }
}

fn sql_err(e: rusqlite::Error) -> CacheError {
    SqlCacheError::Sqlite(e).into()
}

/// Durable [`NormalizedCache`] in a SQLite database.
///
/// One row per record: `key` and the codec blob in `record_fields`.
pub struct SqlNormalizedCache {
    conn: Mutex<Connection>,
}

impl SqlNormalizedCache {
    /// Open or create a cache database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SqlCacheError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.as_ref().display(), "Opening SQL record cache");

        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    /// Cache database that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self, SqlCacheError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, SqlCacheError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                _id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT UNIQUE NOT NULL,
                record_fields TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned.into())
    }

    fn select(conn: &Connection, key: &str) -> CacheResult<Option<Record>> {
        let blob: Option<String> = conn
            .query_row(
                "SELECT record_fields FROM records WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;
        blob.map(|blob| codec::decode_record(key, &blob)).transpose()
    }

    fn delete(conn: &Connection, key: &str) -> CacheResult<Option<Record>> {
        let existing = Self::select(conn, key)?;
        if existing.is_some() {
            conn.execute("DELETE FROM records WHERE key = ?1", params![key])
                .map_err(sql_err)?;
        }
        Ok(existing)
    }

    /// Number of stored records.
    pub fn len(&self) -> CacheResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .map_err(sql_err)?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl NormalizedCache for SqlNormalizedCache {
    fn name(&self) -> &str {
        SQL_LAYER
    }

    fn load(&self, key: &str, headers: &CacheHeaders) -> CacheResult<Option<Record>> {
        let conn = self.lock()?;
        if headers.evict_after_read() {
            return Self::delete(&conn, key);
        }
        Self::select(&conn, key)
    }

    fn merge(&self, records: &RecordSet, headers: &CacheHeaders) -> CacheResult<ChangedKeys> {
        let conn = self.lock()?;
        let mut changed = ChangedKeys::new();

        if headers.do_not_store() {
            for incoming in records.records() {
                let existing = Self::select(&conn, incoming.key())?;
                changed.extend(merge_record(existing, incoming).1);
            }
            return Ok(changed);
        }

        // Rolled back on drop if any record fails.
        let tx = conn.unchecked_transaction().map_err(sql_err)?;
        for incoming in records.records() {
            let existing = Self::select(&tx, incoming.key())?;
            let is_new = existing.is_none();
            let (merged, record_changed) = merge_record(existing, incoming);
            if !is_new && record_changed.is_empty() {
                continue;
            }
            let blob = codec::encode_record(&merged)?;
            tx.execute(
                "INSERT INTO records (key, record_fields) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET record_fields = excluded.record_fields",
                params![merged.key(), blob],
            )
            .map_err(sql_err)?;
            changed.extend(record_changed);
        }
        tx.commit().map_err(sql_err)?;

        tracing::debug!(records = records.len(), changed = changed.len(), "Merged into SQL");
        Ok(changed)
    }

    fn remove_record(&self, key: &str) -> CacheResult<Option<Record>> {
        let conn = self.lock()?;
        Self::delete(&conn, key)
    }

    /// Removes the whole reachable subgraph in one transaction.
    fn remove_subgraph(&self, key: &str) -> CacheResult<Vec<String>> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(sql_err)?;
        let Some(root) = Self::delete(&tx, key)? else {
            return Ok(Vec::new());
        };
        let removed = cascade_remove(root, |k| Self::delete(&tx, k))?;
        tx.commit().map_err(sql_err)?;
        Ok(removed)
    }

    fn clear_all(&self) -> CacheResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM records", []).map_err(sql_err)?;
        Ok(())
    }

    fn dump(&self) -> CacheResult<CacheDump> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT key, record_fields FROM records ORDER BY _id")
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(sql_err)?;

        let mut records = BTreeMap::new();
        for row in rows {
            let (key, blob) = row.map_err(sql_err)?;
            let record = codec::decode_record(&key, &blob)?;
            records.insert(key, record);
        }
        Ok(BTreeMap::from([(SQL_LAYER.to_string(), records)]))
    }
}
