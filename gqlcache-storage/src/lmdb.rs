//! LMDB-backed durable record layer.
//!
//! Uses the heed crate (Rust bindings for LMDB). Each record is stored as
//! its codec blob under its record key. LMDB provides ACID transactions:
//! - Read transactions for `load` and `dump`
//! - One write transaction per `merge` batch, so a batch commits whole or
//!   not at all

use std::collections::BTreeMap;
use std::path::Path;

use gqlcache_core::{
    codec, CacheError, CacheHeaders, CacheResult, ChangedKeys, Record, RecordSet, StorageError,
};
use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions, RwTxn};

use crate::traits::{cascade_remove, merge_record, CacheDump, NormalizedCache};

/// Layer name reported in dumps.
pub const LMDB_LAYER: &str = "lmdb";

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Transaction(reason) => {
                CacheError::Storage(StorageError::TransactionFailed { reason })
            }
            other => CacheError::Storage(StorageError::Backend {
                backend: LMDB_LAYER.to_string(),
                reason: other.to_string(),
            }),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// Durable [`NormalizedCache`] in an LMDB environment.
///
/// # Example
///
/// ```ignore
/// let cache = LmdbNormalizedCache::open("/tmp/gqlcache", 64)?;
/// cache.merge(&records, &CacheHeaders::none())?;
/// let luke = cache.load("Human:1000", &CacheHeaders::none())?;
/// ```
pub struct LmdbNormalizedCache {
    env: Env,
    db: Database<Str, Str>,
}

impl LmdbNormalizedCache {
    /// Open or create a cache environment.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `map_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, map_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Str, Str> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        tracing::info!(path = %path.as_ref().display(), map_size_mb, "Opened LMDB record cache");

        Ok(Self { env, db })
    }

    fn read(&self, txn: &heed::RoTxn<'_>, key: &str) -> CacheResult<Option<Record>> {
        match self.db.get(txn, key).map_err(txn_err)? {
            Some(blob) => Ok(Some(codec::decode_record(key, blob)?)),
            None => Ok(None),
        }
    }

    fn delete_in(&self, wtxn: &mut RwTxn<'_>, key: &str) -> CacheResult<Option<Record>> {
        let existing = self.read(wtxn, key)?;
        if existing.is_some() {
            self.db.delete(wtxn, key).map_err(txn_err)?;
        }
        Ok(existing)
    }

    /// Number of stored records.
    pub fn len(&self) -> CacheResult<u64> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self.db.len(&rtxn).map_err(txn_err)?)
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl NormalizedCache for LmdbNormalizedCache {
    fn name(&self) -> &str {
        LMDB_LAYER
    }

    fn load(&self, key: &str, headers: &CacheHeaders) -> CacheResult<Option<Record>> {
        if headers.evict_after_read() {
            let mut wtxn = self.env.write_txn().map_err(txn_err)?;
            let record = self.delete_in(&mut wtxn, key)?;
            wtxn.commit().map_err(txn_err)?;
            return Ok(record);
        }
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.read(&rtxn, key)
    }

    fn merge(&self, records: &RecordSet, headers: &CacheHeaders) -> CacheResult<ChangedKeys> {
        let mut changed = ChangedKeys::new();

        if headers.do_not_store() {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            for incoming in records.records() {
                let existing = self.read(&rtxn, incoming.key())?;
                changed.extend(merge_record(existing, incoming).1);
            }
            return Ok(changed);
        }

        // Dropping the transaction on an early return aborts it.
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        for incoming in records.records() {
            let existing = self.read(&wtxn, incoming.key())?;
            let is_new = existing.is_none();
            let (merged, record_changed) = merge_record(existing, incoming);
            if !is_new && record_changed.is_empty() {
                continue;
            }
            let blob = codec::encode_record(&merged)?;
            self.db
                .put(&mut wtxn, merged.key(), &blob)
                .map_err(txn_err)?;
            changed.extend(record_changed);
        }
        wtxn.commit().map_err(txn_err)?;

        tracing::debug!(records = records.len(), changed = changed.len(), "Merged into LMDB");
        Ok(changed)
    }

    fn remove_record(&self, key: &str) -> CacheResult<Option<Record>> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let removed = self.delete_in(&mut wtxn, key)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(removed)
    }

    /// Removes the whole reachable subgraph in one write transaction.
    fn remove_subgraph(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let Some(root) = self.delete_in(&mut wtxn, key)? else {
            return Ok(Vec::new());
        };
        let removed = cascade_remove(root, |k| self.delete_in(&mut wtxn, k))?;
        wtxn.commit().map_err(txn_err)?;
        Ok(removed)
    }

    fn clear_all(&self) -> CacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db.clear(&mut wtxn).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn dump(&self) -> CacheResult<CacheDump> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut records = BTreeMap::new();
        for entry in self.db.iter(&rtxn).map_err(txn_err)? {
            let (key, blob) = entry.map_err(txn_err)?;
            records.insert(key.to_string(), codec::decode_record(key, blob)?);
        }
        Ok(BTreeMap::from([(LMDB_LAYER.to_string(), records)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gqlcache_core::{CacheReference, FieldValue, DO_NOT_STORE};
    use tempfile::TempDir;

    fn create_test_cache() -> (LmdbNormalizedCache, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let cache = LmdbNormalizedCache::open(temp_dir.path(), 10).expect("cache open should succeed");
        (cache, temp_dir)
    }

    fn luke_and_leia() -> RecordSet {
        vec![
            Record::new("QUERY_ROOT").field("hero", CacheReference::new("Human:1000")),
            Record::new("Human:1000")
                .field("name", "Luke")
                .field("friends", FieldValue::List(vec![CacheReference::new("Human:1003").into()])),
            Record::new("Human:1003").field("name", "Leia"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_merge_and_load_round_trip() {
        let (cache, _temp_dir) = create_test_cache();
        let changed = cache.merge(&luke_and_leia(), &CacheHeaders::none()).unwrap();
        assert!(changed.contains("QUERY_ROOT.hero"));
        assert!(changed.contains("Human:1000.friends"));

        let luke = cache.load("Human:1000", &CacheHeaders::none()).unwrap().unwrap();
        assert_eq!(Some(&luke), luke_and_leia().get("Human:1000"));
        assert_eq!(
            luke.get("friends"),
            Some(&FieldValue::List(vec![CacheReference::new("Human:1003").into()]))
        );
    }

    #[test]
    fn test_unchanged_merge_reports_nothing() {
        let (cache, _temp_dir) = create_test_cache();
        cache.merge(&luke_and_leia(), &CacheHeaders::none()).unwrap();
        let changed = cache.merge(&luke_and_leia(), &CacheHeaders::none()).unwrap();
        assert!(changed.is_empty());
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = LmdbNormalizedCache::open(temp_dir.path(), 10).unwrap();
            cache.merge(&luke_and_leia(), &CacheHeaders::none()).unwrap();
        }
        let cache = LmdbNormalizedCache::open(temp_dir.path(), 10).unwrap();
        assert_eq!(cache.len().unwrap(), 3);
        assert!(cache.load("Human:1003", &CacheHeaders::none()).unwrap().is_some());
    }

    #[test]
    fn test_do_not_store() {
        let (cache, _temp_dir) = create_test_cache();
        let headers = CacheHeaders::builder().add_header(DO_NOT_STORE, "true").build();
        let changed = cache.merge(&luke_and_leia(), &headers).unwrap();
        assert_eq!(changed.len(), 4);
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_evict_after_read() {
        let (cache, _temp_dir) = create_test_cache();
        cache.merge(&luke_and_leia(), &CacheHeaders::none()).unwrap();
        let headers = CacheHeaders::builder().evict_after_read().build();
        assert!(cache.load("Human:1003", &headers).unwrap().is_some());
        assert!(cache.load("Human:1003", &CacheHeaders::none()).unwrap().is_none());
    }

    #[test]
    fn test_cascading_remove() {
        let (cache, _temp_dir) = create_test_cache();
        cache.merge(&luke_and_leia(), &CacheHeaders::none()).unwrap();

        assert!(cache.remove("QUERY_ROOT", true).unwrap());
        assert!(cache.is_empty().unwrap());
        assert!(!cache.remove("QUERY_ROOT", true).unwrap());
    }

    #[test]
    fn test_clear_all_and_dump() {
        let (cache, _temp_dir) = create_test_cache();
        cache.merge(&luke_and_leia(), &CacheHeaders::none()).unwrap();
        let dump = cache.dump().unwrap();
        assert_eq!(dump.get(LMDB_LAYER).map(|r| r.len()), Some(3));

        cache.clear_all().unwrap();
        assert!(cache.dump().unwrap()[LMDB_LAYER].is_empty());
    }

    #[test]
    fn test_corrupt_blob_surfaces_codec_error() {
        let (cache, _temp_dir) = create_test_cache();
        let mut wtxn = cache.env.write_txn().unwrap();
        cache.db.put(&mut wtxn, "Human:1000", "not json").unwrap();
        cache.db.put(&mut wtxn, "Human:1003", r#"{"name":"Leia"}"#).unwrap();
        wtxn.commit().unwrap();

        let err = cache.load("Human:1000", &CacheHeaders::none()).unwrap_err();
        assert!(matches!(err, CacheError::Codec(_)));
        // Other keys are unaffected.
        assert!(cache.load("Human:1003", &CacheHeaders::none()).unwrap().is_some());
    }
}
