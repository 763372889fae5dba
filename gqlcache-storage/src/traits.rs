//! Cache layer trait and shared merge semantics.
//!
//! Every storage layer implements [`NormalizedCache`] against its own local
//! state only. Delegation between layers is the job of
//! [`CacheChain`](crate::chain::CacheChain).

use gqlcache_core::{field_path, CacheHeaders, CacheResult, ChangedKeys, Record, RecordSet};
use gqlcache_normalizer::RecordSource;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Records held by each layer, keyed by layer name then record key.
pub type CacheDump = BTreeMap<String, BTreeMap<String, Record>>;

/// A record storage layer.
///
/// Implementations must be safe to share between threads. `merge` is atomic
/// per call: either every record of the batch is committed or none is.
pub trait NormalizedCache: Send + Sync {
    /// Layer name used in [`CacheDump`] and logs.
    fn name(&self) -> &str;

    /// Load one record.
    ///
    /// Honors [`EVICT_AFTER_READ`](gqlcache_core::EVICT_AFTER_READ) by
    /// deleting the record after serving it.
    fn load(&self, key: &str, headers: &CacheHeaders) -> CacheResult<Option<Record>>;

    /// Load several records; missing keys are omitted from the result.
    fn load_many(&self, keys: &[&str], headers: &CacheHeaders) -> CacheResult<Vec<Record>> {
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.load(key, headers)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Union-merge a batch and return the changed `<key>.<field>` set.
    ///
    /// With [`DO_NOT_STORE`](gqlcache_core::DO_NOT_STORE) nothing is
    /// written, but the returned set is the one a real merge would produce.
    fn merge(&self, records: &RecordSet, headers: &CacheHeaders) -> CacheResult<ChangedKeys>;

    /// Delete one record from this layer, returning it if it was present.
    fn remove_record(&self, key: &str) -> CacheResult<Option<Record>>;

    /// Delete `key` and every record reachable from it.
    ///
    /// Returns the deleted keys, root first, or nothing when `key` is not
    /// present. The walk keeps going past references that are already gone.
    fn remove_subgraph(&self, key: &str) -> CacheResult<Vec<String>> {
        match self.remove_record(key)? {
            Some(root) => cascade_remove(root, |k| self.remove_record(k)),
            None => Ok(Vec::new()),
        }
    }

    /// Delete a record, and with `cascade` everything reachable from it.
    ///
    /// Returns true iff `key` itself was deleted.
    fn remove(&self, key: &str, cascade: bool) -> CacheResult<bool> {
        if cascade {
            Ok(!self.remove_subgraph(key)?.is_empty())
        } else {
            Ok(self.remove_record(key)?.is_some())
        }
    }

    fn clear_all(&self) -> CacheResult<()>;

    /// Snapshot of every record in this layer, for diagnostics.
    fn dump(&self) -> CacheResult<CacheDump>;
}

// Lets one layer be shared between a chain and its owner.
impl<C: NormalizedCache + ?Sized> NormalizedCache for Arc<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn load(&self, key: &str, headers: &CacheHeaders) -> CacheResult<Option<Record>> {
        (**self).load(key, headers)
    }

    fn merge(&self, records: &RecordSet, headers: &CacheHeaders) -> CacheResult<ChangedKeys> {
        (**self).merge(records, headers)
    }

    fn remove_record(&self, key: &str) -> CacheResult<Option<Record>> {
        (**self).remove_record(key)
    }

    fn remove_subgraph(&self, key: &str) -> CacheResult<Vec<String>> {
        (**self).remove_subgraph(key)
    }

    fn remove(&self, key: &str, cascade: bool) -> CacheResult<bool> {
        (**self).remove(key, cascade)
    }

    fn clear_all(&self) -> CacheResult<()> {
        (**self).clear_all()
    }

    fn dump(&self) -> CacheResult<CacheDump> {
        (**self).dump()
    }
}

impl RecordSource for dyn NormalizedCache {
    fn load_record(&self, key: &str, headers: &CacheHeaders) -> CacheResult<Option<Record>> {
        self.load(key, headers)
    }
}

/// Merge `incoming` over `existing`, returning the stored result and the
/// qualified paths that changed.
pub fn merge_record(existing: Option<Record>, incoming: &Record) -> (Record, ChangedKeys) {
    match existing {
        Some(mut current) => {
            let changed = current
                .merge_with(incoming)
                .into_iter()
                .map(|name| field_path(incoming.key(), &name))
                .collect();
            (current, changed)
        }
        None => (incoming.clone(), incoming.field_paths()),
    }
}

/// Walk references from an already removed `root`, removing each reachable
/// record once. Returns the removed keys, root first.
pub(crate) fn cascade_remove<F>(root: Record, mut remove: F) -> CacheResult<Vec<String>>
where
    F: FnMut(&str) -> CacheResult<Option<Record>>,
{
    let mut visited = BTreeSet::from([root.key().to_string()]);
    let mut pending: Vec<String> = root.referenced_keys().into_iter().collect();
    let mut removed = vec![root.key().to_string()];

    while let Some(key) = pending.pop() {
        if !visited.insert(key.clone()) {
            continue;
        }
        match remove(&key)? {
            Some(record) => {
                pending.extend(record.referenced_keys());
                removed.push(key);
            }
            None => {
                tracing::warn!(key = %key, root = %root.key(), "Cascaded remove found no record");
            }
        }
    }

    Ok(removed)
}

/// Statistics about a layer's usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of records currently held.
    pub entry_count: u64,
    /// Total weight of held records in bytes.
    pub memory_bytes: u64,
    /// Number of records dropped by size, count or expiry bounds.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
