//! Bounded in-memory record layer.
//!
//! Records live in an LRU list guarded by a single mutex. Weight and expiry
//! bookkeeping sits next to each entry, so a merge that changes a record's
//! size re-inserts it and the bounds are re-checked right away.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use gqlcache_core::{
    CacheHeaders, CacheResult, ChangedKeys, EvictionPolicy, Record, RecordSet, StorageError,
};
use lru::LruCache;

use crate::traits::{merge_record, CacheDump, CacheStats, NormalizedCache};

/// Layer name reported in dumps.
pub const MEMORY_LAYER: &str = "memory";

struct Entry {
    record: Record,
    weight: u64,
    written_at: Instant,
    accessed_at: Instant,
}

impl Entry {
    fn new(record: Record, now: Instant) -> Self {
        let weight = weigh(&record);
        Self {
            record,
            weight,
            written_at: now,
            accessed_at: now,
        }
    }

    fn is_expired(&self, policy: &EvictionPolicy, now: Instant) -> bool {
        let elapsed = |since: Instant, limit: Option<Duration>| {
            limit.is_some_and(|limit| now.saturating_duration_since(since) >= limit)
        };
        elapsed(self.written_at, policy.expire_after_write)
            || elapsed(self.accessed_at, policy.expire_after_access)
    }
}

/// Eviction weight: record size estimate plus key length.
fn weigh(record: &Record) -> u64 {
    (record.size_estimate() + record.key().len()) as u64
}

struct MemoryState {
    entries: LruCache<String, Entry>,
    total_weight: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl MemoryState {
    fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            total_weight: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn insert(&mut self, key: String, entry: Entry) {
        self.total_weight += entry.weight;
        if let Some(previous) = self.entries.put(key, entry) {
            self.total_weight = self.total_weight.saturating_sub(previous.weight);
        }
    }

    fn take(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.pop(key)?;
        self.total_weight = self.total_weight.saturating_sub(entry.weight);
        Some(entry)
    }

    fn evict(&mut self, key: &str) {
        if self.take(key).is_some() {
            self.evictions += 1;
        }
    }

    /// Live entry for `key`, dropping it first if it has expired.
    fn live(&mut self, key: &str, policy: &EvictionPolicy, now: Instant) -> Option<&mut Entry> {
        let expired = self
            .entries
            .peek(key)
            .is_some_and(|entry| entry.is_expired(policy, now));
        if expired {
            tracing::debug!(key = %key, "Record expired");
            self.evict(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    fn over_bounds(&self, policy: &EvictionPolicy) -> bool {
        policy
            .max_size_bytes
            .is_some_and(|max| self.total_weight > max)
            || policy
                .max_entries
                .is_some_and(|max| self.entries.len() as u64 > max)
    }

    /// Restore the size and count bounds after inserting `key`.
    fn enforce(&mut self, key: &str, policy: &EvictionPolicy) {
        // An entry heavier than the whole budget can never fit; drop it
        // instead of draining everything else.
        let oversized = match (policy.max_size_bytes, self.entries.peek(key)) {
            (Some(max), Some(entry)) => entry.weight > max,
            _ => false,
        };
        if oversized {
            tracing::debug!(key = %key, "Record exceeds max size, evicted on insert");
            self.evict(key);
        }

        while self.over_bounds(policy) {
            match self.entries.pop_lru() {
                Some((evicted, entry)) => {
                    self.total_weight = self.total_weight.saturating_sub(entry.weight);
                    self.evictions += 1;
                    tracing::debug!(key = %evicted, "Evicted least recently used record");
                }
                None => break,
            }
        }
    }
}

/// In-memory [`NormalizedCache`] with optional LRU size, count and expiry
/// bounds.
pub struct MemoryNormalizedCache {
    policy: EvictionPolicy,
    state: Mutex<MemoryState>,
}

impl Default for MemoryNormalizedCache {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl MemoryNormalizedCache {
    /// Create a layer bounded by `policy`.
    pub fn new(policy: EvictionPolicy) -> CacheResult<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            state: Mutex::new(MemoryState::new()),
        })
    }

    /// Layer that never evicts.
    pub fn unbounded() -> Self {
        Self {
            policy: EvictionPolicy::unbounded(),
            state: Mutex::new(MemoryState::new()),
        }
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| StorageError::LockPoisoned.into())
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheResult<CacheStats> {
        let state = self.lock()?;
        Ok(CacheStats {
            hits: state.hits,
            misses: state.misses,
            entry_count: state.entries.len() as u64,
            memory_bytes: state.total_weight,
            evictions: state.evictions,
        })
    }

    /// Number of records currently held, expired or not.
    pub fn len(&self) -> CacheResult<usize> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl NormalizedCache for MemoryNormalizedCache {
    fn name(&self) -> &str {
        MEMORY_LAYER
    }

    fn load(&self, key: &str, headers: &CacheHeaders) -> CacheResult<Option<Record>> {
        let now = Instant::now();
        let mut state = self.lock()?;

        let record = match state.live(key, &self.policy, now) {
            Some(entry) => {
                entry.accessed_at = now;
                Some(entry.record.clone())
            }
            None => None,
        };

        match record {
            Some(record) => {
                state.hits += 1;
                if headers.evict_after_read() {
                    state.take(key);
                }
                Ok(Some(record))
            }
            None => {
                state.misses += 1;
                Ok(None)
            }
        }
    }

    fn merge(&self, records: &RecordSet, headers: &CacheHeaders) -> CacheResult<ChangedKeys> {
        let now = Instant::now();
        let mut state = self.lock()?;
        let mut changed = ChangedKeys::new();

        for incoming in records.records() {
            let key = incoming.key();
            let existing = state.live(key, &self.policy, now).map(|e| e.record.clone());
            let (merged, record_changed) = merge_record(existing, incoming);
            changed.extend(record_changed);

            if headers.do_not_store() {
                continue;
            }
            // Re-insert so the new weight and recency are accounted for.
            state.take(key);
            state.insert(key.to_string(), Entry::new(merged, now));
            state.enforce(key, &self.policy);
        }

        Ok(changed)
    }

    fn remove_record(&self, key: &str) -> CacheResult<Option<Record>> {
        Ok(self.lock()?.take(key).map(|entry| entry.record))
    }

    fn clear_all(&self) -> CacheResult<()> {
        let mut state = self.lock()?;
        state.entries.clear();
        state.total_weight = 0;
        Ok(())
    }

    fn dump(&self) -> CacheResult<CacheDump> {
        let now = Instant::now();
        let state = self.lock()?;
        let records: BTreeMap<String, Record> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(&self.policy, now))
            .map(|(key, entry)| (key.clone(), entry.record.clone()))
            .collect();
        Ok(BTreeMap::from([(MEMORY_LAYER.to_string(), records)]))
    }
}
