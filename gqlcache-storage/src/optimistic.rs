//! Optimistic overlay.
//!
//! Optimistic writes never touch the durable layers. Each key with pending
//! optimistic versions has a [`RecordJournal`]; reads see the durable record
//! with the journal snapshot merged on top.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gqlcache_core::{
    field_path, CacheHeaders, CacheResult, ChangedKeys, MutationId, Record, RecordSet,
};
use gqlcache_normalizer::RecordSource;
use std::collections::BTreeMap;

use crate::traits::{CacheDump, NormalizedCache};

/// Layer name of the overlay snapshots in dumps.
pub const OPTIMISTIC_LAYER: &str = "optimistic";

/// Ordered optimistic versions of one record.
///
/// `snapshot` is always the cumulative merge of `history` in insertion
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordJournal {
    snapshot: Record,
    history: Vec<Record>,
}

impl RecordJournal {
    pub fn new(record: Record) -> Self {
        Self {
            snapshot: record.clone(),
            history: vec![record],
        }
    }

    pub fn snapshot(&self) -> &Record {
        &self.snapshot
    }

    pub fn history(&self) -> &[Record] {
        &self.history
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Append a version and merge it into the snapshot.
    pub fn add(&mut self, record: Record) -> ChangedKeys {
        let changed = self
            .snapshot
            .merge_with(&record)
            .into_iter()
            .map(|name| field_path(record.key(), &name))
            .collect();
        self.history.push(record);
        changed
    }

    /// Drop the first version written by `mutation_id` and rebuild the
    /// snapshot from the versions that remain.
    ///
    /// Returns every field the removed version wrote plus any field whose
    /// snapshot value moved.
    pub fn revert(&mut self, mutation_id: MutationId) -> ChangedKeys {
        let Some(index) = self
            .history
            .iter()
            .position(|r| r.mutation_id() == Some(mutation_id))
        else {
            return ChangedKeys::new();
        };

        let removed = self.history.remove(index);
        let previous = std::mem::replace(&mut self.snapshot, Record::new(removed.key()));
        for version in &self.history {
            self.snapshot.merge_with(version);
        }

        let mut changed = removed.field_paths();
        for (name, value) in previous.fields() {
            if self.snapshot.get(name) != Some(value) {
                changed.insert(field_path(previous.key(), name));
            }
        }
        changed
    }
}

/// Overlay of optimistic journals above a durable cache.
pub struct OptimisticCache {
    base: Box<dyn NormalizedCache>,
    journals: DashMap<String, RecordJournal>,
}

impl OptimisticCache {
    pub fn new<C: NormalizedCache + 'static>(base: C) -> Self {
        Self {
            base: Box::new(base),
            journals: DashMap::new(),
        }
    }

    /// The durable cache under the overlay.
    pub fn base(&self) -> &dyn NormalizedCache {
        self.base.as_ref()
    }

    /// Apply one optimistic version tagged with `mutation_id`.
    pub fn merge_optimistic_update(&self, record: Record, mutation_id: MutationId) -> ChangedKeys {
        let record = record.with_mutation_id(mutation_id);
        match self.journals.entry(record.key().to_string()) {
            Entry::Occupied(mut journal) => journal.get_mut().add(record),
            Entry::Vacant(slot) => {
                let changed = record.field_paths();
                slot.insert(RecordJournal::new(record));
                changed
            }
        }
    }

    pub fn merge_optimistic_updates(&self, records: &RecordSet, mutation_id: MutationId) -> ChangedKeys {
        let mut changed = ChangedKeys::new();
        for record in records.records() {
            changed.extend(self.merge_optimistic_update(record.clone(), mutation_id));
        }
        tracing::debug!(
            mutation_id = %mutation_id,
            records = records.len(),
            changed = changed.len(),
            "Applied optimistic updates"
        );
        changed
    }

    /// Withdraw every optimistic version written by `mutation_id`.
    ///
    /// Journals left without versions are dropped, so those keys read the
    /// durable record again.
    pub fn rollback_optimistic_updates(&self, mutation_id: MutationId) -> ChangedKeys {
        let mut changed = ChangedKeys::new();
        for mut journal in self.journals.iter_mut() {
            changed.extend(journal.revert(mutation_id));
        }
        self.journals.retain(|_, journal| !journal.is_empty());
        tracing::debug!(mutation_id = %mutation_id, changed = changed.len(), "Rolled back optimistic updates");
        changed
    }

    /// Keys with pending optimistic versions.
    pub fn pending_keys(&self) -> Vec<String> {
        self.journals.iter().map(|entry| entry.key().clone()).collect()
    }

    fn overlay(&self, key: &str, durable: Option<Record>) -> Option<Record> {
        let Some(journal) = self.journals.get(key) else {
            return durable;
        };
        let snapshot = journal.snapshot();
        match durable {
            Some(mut record) => {
                record.merge_with(snapshot);
                Some(record)
            }
            None => Some(snapshot.clone()),
        }
    }
}

impl NormalizedCache for OptimisticCache {
    fn name(&self) -> &str {
        OPTIMISTIC_LAYER
    }

    fn load(&self, key: &str, headers: &CacheHeaders) -> CacheResult<Option<Record>> {
        let durable = self.base.load(key, headers)?;
        Ok(self.overlay(key, durable))
    }

    fn merge(&self, records: &RecordSet, headers: &CacheHeaders) -> CacheResult<ChangedKeys> {
        self.base.merge(records, headers)
    }

    fn remove_record(&self, key: &str) -> CacheResult<Option<Record>> {
        let durable = self.base.remove_record(key)?;
        let optimistic = self.journals.remove(key).map(|(_, journal)| journal.snapshot);
        Ok(durable.or(optimistic))
    }

    /// Journals go with every key the durable cascade removed.
    fn remove_subgraph(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut removed = self.base.remove_subgraph(key)?;
        if removed.is_empty() && self.journals.contains_key(key) {
            removed.push(key.to_string());
        }
        for k in &removed {
            self.journals.remove(k);
        }
        Ok(removed)
    }

    fn clear_all(&self) -> CacheResult<()> {
        self.base.clear_all()?;
        self.journals.clear();
        Ok(())
    }

    fn dump(&self) -> CacheResult<CacheDump> {
        let mut dump = self.base.dump()?;
        let snapshots: BTreeMap<String, Record> = self
            .journals
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot.clone()))
            .collect();
        dump.insert(OPTIMISTIC_LAYER.to_string(), snapshots);
        Ok(dump)
    }
}

impl RecordSource for OptimisticCache {
    fn load_record(&self, key: &str, headers: &CacheHeaders) -> CacheResult<Option<Record>> {
        self.load(key, headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryNormalizedCache;
    use gqlcache_core::{new_mutation_id, FieldValue};

    fn one(record: Record) -> RecordSet {
        std::iter::once(record).collect()
    }

    fn durable_luke() -> OptimisticCache {
        let cache = OptimisticCache::new(MemoryNormalizedCache::unbounded());
        cache
            .merge(
                &one(Record::new("Human:1000").field("name", "Luke").field("mass", 77_i64)),
                &CacheHeaders::none(),
            )
            .unwrap();
        cache
    }

    fn name_of(cache: &OptimisticCache, key: &str) -> Option<FieldValue> {
        cache
            .load(key, &CacheHeaders::none())
            .unwrap()
            .and_then(|r| r.get("name").cloned())
    }

    #[test]
    fn test_optimistic_value_overrides_durable_but_keeps_other_fields() {
        let cache = durable_luke();
        let id = new_mutation_id();
        let changed = cache.merge_optimistic_update(Record::new("Human:1000").field("name", "Skywalker"), id);
        assert_eq!(changed, ChangedKeys::from(["Human:1000.name".to_string()]));

        let luke = cache.load("Human:1000", &CacheHeaders::none()).unwrap().unwrap();
        assert_eq!(luke.get("name"), Some(&FieldValue::from("Skywalker")));
        assert_eq!(luke.get("mass"), Some(&FieldValue::from(77_i64)));

        // Durable layer is untouched.
        let durable = cache.base().load("Human:1000", &CacheHeaders::none()).unwrap().unwrap();
        assert_eq!(durable.get("name"), Some(&FieldValue::from("Luke")));
    }

    #[test]
    fn test_rollback_restores_durable_and_drops_journal() {
        let cache = durable_luke();
        let id = new_mutation_id();
        cache.merge_optimistic_update(Record::new("Human:1000").field("name", "Skywalker"), id);

        let changed = cache.rollback_optimistic_updates(id);
        assert!(changed.contains("Human:1000.name"));
        assert_eq!(name_of(&cache, "Human:1000"), Some(FieldValue::from("Luke")));
        assert!(cache.pending_keys().is_empty());
    }

    #[test]
    fn test_rollback_of_middle_entry_replays_rest() {
        let cache = durable_luke();
        let (a, b, c) = (new_mutation_id(), new_mutation_id(), new_mutation_id());
        cache.merge_optimistic_update(Record::new("Human:1000").field("name", "A"), a);
        cache.merge_optimistic_update(Record::new("Human:1000").field("name", "B").field("mass", 80_i64), b);
        cache.merge_optimistic_update(Record::new("Human:1000").field("name", "C"), c);

        cache.rollback_optimistic_updates(c);
        assert_eq!(name_of(&cache, "Human:1000"), Some(FieldValue::from("B")));

        // Removing B must also withdraw its mass, which A never wrote.
        let changed = cache.rollback_optimistic_updates(b);
        assert!(changed.contains("Human:1000.mass"));
        let luke = cache.load("Human:1000", &CacheHeaders::none()).unwrap().unwrap();
        assert_eq!(luke.get("name"), Some(&FieldValue::from("A")));
        assert_eq!(luke.get("mass"), Some(&FieldValue::from(77_i64)));
    }

    #[test]
    fn test_rollback_of_first_keeps_later_update_over_base() {
        let cache = durable_luke();
        let (m1, m2) = (new_mutation_id(), new_mutation_id());
        cache.merge_optimistic_update(Record::new("Human:1000").field("name", "U1").field("mass", 90_i64), m1);
        cache.merge_optimistic_update(Record::new("Human:1000").field("name", "U2"), m2);

        cache.rollback_optimistic_updates(m1);
        let luke = cache.load("Human:1000", &CacheHeaders::none()).unwrap().unwrap();
        let expected = Record::new("Human:1000")
            .field("name", "U2")
            .field("mass", 77_i64)
            .with_mutation_id(m2);
        assert_eq!(luke, expected);
    }

    #[test]
    fn test_rollback_unknown_mutation_is_noop() {
        let cache = durable_luke();
        cache.merge_optimistic_update(Record::new("Human:1000").field("name", "X"), new_mutation_id());
        assert!(cache.rollback_optimistic_updates(new_mutation_id()).is_empty());
        assert_eq!(cache.pending_keys(), vec!["Human:1000".to_string()]);
    }

    #[test]
    fn test_optimistic_only_record_is_readable() {
        let cache = OptimisticCache::new(MemoryNormalizedCache::unbounded());
        let id = new_mutation_id();
        cache.merge_optimistic_updates(&one(Record::new("Review:1").field("stars", 5_i64)), id);
        let review = cache.load("Review:1", &CacheHeaders::none()).unwrap().unwrap();
        assert_eq!(review.mutation_id(), Some(id));

        cache.rollback_optimistic_updates(id);
        assert!(cache.load("Review:1", &CacheHeaders::none()).unwrap().is_none());
    }

    #[test]
    fn test_journal_revert_only_first_match() {
        let id = new_mutation_id();
        let mut journal = RecordJournal::new(Record::new("k").field("a", 1_i64).with_mutation_id(id));
        journal.add(Record::new("k").field("a", 2_i64).with_mutation_id(id));
        journal.revert(id);
        assert_eq!(journal.history().len(), 1);
        assert_eq!(journal.snapshot().get("a"), Some(&FieldValue::from(2_i64)));
    }

    #[test]
    fn test_cascade_drops_journals_of_removed_children() {
        let cache = OptimisticCache::new(MemoryNormalizedCache::unbounded());
        cache
            .merge(
                &vec![
                    Record::new("QUERY_ROOT").field("hero", gqlcache_core::CacheReference::new("Human:1000")),
                    Record::new("Human:1000").field("name", "Luke"),
                ]
                .into_iter()
                .collect(),
                &CacheHeaders::none(),
            )
            .unwrap();
        cache.merge_optimistic_update(Record::new("Human:1000").field("name", "Skywalker"), new_mutation_id());

        assert!(cache.remove("QUERY_ROOT", true).unwrap());
        assert!(cache.load("Human:1000", &CacheHeaders::none()).unwrap().is_none());
        assert!(cache.pending_keys().is_empty());
    }

    #[test]
    fn test_remove_of_optimistic_only_record() {
        let cache = OptimisticCache::new(MemoryNormalizedCache::unbounded());
        cache.merge_optimistic_update(Record::new("Review:1").field("stars", 5_i64), new_mutation_id());
        assert!(cache.remove("Review:1", true).unwrap());
        assert!(cache.load("Review:1", &CacheHeaders::none()).unwrap().is_none());
        assert!(!cache.remove("Review:1", false).unwrap());
    }

    #[test]
    fn test_dump_includes_overlay() {
        let cache = durable_luke();
        cache.merge_optimistic_update(Record::new("Human:1000").field("name", "X"), new_mutation_id());
        let dump = cache.dump().unwrap();
        assert_eq!(dump[OPTIMISTIC_LAYER].len(), 1);
        assert_eq!(dump["memory"].len(), 1);
    }
}
