//! Normalized store facade.
//!
//! [`NormalizedStore`] owns the layer stack, the key resolver and the
//! changed-key broadcaster. Writes normalize and merge under an exclusive
//! lock and reads run under a shared one, so a read observes either the
//! whole of a write or none of it.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use gqlcache_core::{
    CacheHeaders, CacheResult, ChangedKeys, MutationId, Operation, Record, RecordSet,
    SelectionSet, StorageError, StoreConfig, Variables,
};
use gqlcache_normalizer::{
    normalize_operation, read_operation, CacheKeyResolver, Normalizer, ReadResult, RecordReader,
};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::broadcast::ChangeBroadcaster;
use crate::memory::MemoryNormalizedCache;
use crate::optimistic::OptimisticCache;
use crate::traits::{CacheDump, NormalizedCache};

pub struct NormalizedStore {
    cache: OptimisticCache,
    resolver: Arc<dyn CacheKeyResolver>,
    broadcaster: ChangeBroadcaster,
    config: StoreConfig,
    lock: RwLock<()>,
}

impl NormalizedStore {
    /// Store over `cache`, usually a [`CacheChain`](crate::chain::CacheChain).
    pub fn new<C, R>(cache: C, resolver: R, config: StoreConfig) -> CacheResult<Self>
    where
        C: NormalizedCache + 'static,
        R: CacheKeyResolver + 'static,
    {
        config.validate()?;
        Ok(Self {
            cache: OptimisticCache::new(cache),
            resolver: Arc::new(resolver),
            broadcaster: ChangeBroadcaster::new(config.change_buffer),
            config,
            lock: RwLock::new(()),
        })
    }

    /// Store backed by a single memory layer bounded by `config.eviction`.
    pub fn in_memory<R>(resolver: R, config: StoreConfig) -> CacheResult<Self>
    where
        R: CacheKeyResolver + 'static,
    {
        let memory = MemoryNormalizedCache::new(config.eviction.clone())?;
        Self::new(memory, resolver, config)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn resolver(&self) -> &dyn CacheKeyResolver {
        self.resolver.as_ref()
    }

    fn read_guard(&self) -> CacheResult<RwLockReadGuard<'_, ()>> {
        self.lock.read().map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write_guard(&self) -> CacheResult<RwLockWriteGuard<'_, ()>> {
        self.lock.write().map_err(|_| StorageError::LockPoisoned.into())
    }

    /// Normalize `data` without storing it.
    pub fn normalize(&self, operation: &Operation, data: &Value) -> CacheResult<RecordSet> {
        normalize_operation(operation, data, self.resolver.as_ref())
    }

    /// Normalize an operation response and merge it into the cache.
    ///
    /// Subscribers are notified of the changed keys unless `headers` asks
    /// for [`DO_NOT_STORE`](gqlcache_core::DO_NOT_STORE).
    pub fn write_operation(
        &self,
        operation: &Operation,
        data: &Value,
        headers: &CacheHeaders,
    ) -> CacheResult<ChangedKeys> {
        let records = self.normalize(operation, data)?;
        self.merge_records(&records, headers)
    }

    /// Merge already normalized records.
    pub fn merge_records(&self, records: &RecordSet, headers: &CacheHeaders) -> CacheResult<ChangedKeys> {
        let changed = {
            let _guard = self.write_guard()?;
            self.cache.merge(records, headers)?
        };
        if !headers.do_not_store() {
            self.broadcaster.publish(changed.clone());
        }
        Ok(changed)
    }

    /// Normalize `data` as the selection rooted at `key` and merge it.
    pub fn write_fragment(
        &self,
        selections: &SelectionSet,
        key: &str,
        data: &Value,
        variables: &Variables,
    ) -> CacheResult<ChangedKeys> {
        let records = Normalizer::new(self.resolver.as_ref(), variables).normalize(key, selections, data)?;
        self.merge_records(&records, &CacheHeaders::none())
    }

    /// Apply a mutation's optimistic response on top of durable data.
    pub fn write_optimistic_updates(
        &self,
        operation: &Operation,
        data: &Value,
        mutation_id: MutationId,
    ) -> CacheResult<ChangedKeys> {
        let records = self.normalize(operation, data)?;
        let changed = {
            let _guard = self.write_guard()?;
            self.cache.merge_optimistic_updates(&records, mutation_id)
        };
        self.broadcaster.publish(changed.clone());
        Ok(changed)
    }

    pub fn rollback_optimistic_updates(&self, mutation_id: MutationId) -> CacheResult<ChangedKeys> {
        let changed = {
            let _guard = self.write_guard()?;
            self.cache.rollback_optimistic_updates(mutation_id)
        };
        self.broadcaster.publish(changed.clone());
        Ok(changed)
    }

    /// Rebuild an operation's data from the cache.
    pub fn read_operation(&self, operation: &Operation, headers: &CacheHeaders) -> CacheResult<ReadResult> {
        let _guard = self.read_guard()?;
        read_operation(&self.cache, operation, self.resolver.as_ref(), headers)
    }

    /// Read a selection rooted at an arbitrary record key.
    pub fn read_fragment(
        &self,
        selections: &SelectionSet,
        key: &str,
        variables: &Variables,
    ) -> CacheResult<ReadResult> {
        let _guard = self.read_guard()?;
        RecordReader::new(&self.cache, self.resolver.as_ref(), variables).read_selection(key, selections)
    }

    /// Load one record as readers see it, optimistic versions included.
    pub fn load_record(&self, key: &str) -> CacheResult<Option<Record>> {
        let _guard = self.read_guard()?;
        self.cache.load(key, &CacheHeaders::none())
    }

    pub fn remove(&self, key: &str, cascade: bool) -> CacheResult<bool> {
        let _guard = self.write_guard()?;
        let removed = self.cache.remove(key, cascade)?;
        tracing::debug!(key = %key, cascade, removed, "Removed record");
        Ok(removed)
    }

    pub fn clear_all(&self) -> CacheResult<()> {
        let _guard = self.write_guard()?;
        self.cache.clear_all()
    }

    pub fn dump(&self) -> CacheResult<CacheDump> {
        let _guard = self.read_guard()?;
        self.cache.dump()
    }

    /// Subscribe to changed-key sets published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangedKeys> {
        self.broadcaster.subscribe()
    }

    /// Notify subscribers of changes made outside the store's own writes.
    pub fn publish(&self, changed: ChangedKeys) {
        self.broadcaster.publish(changed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gqlcache_core::{new_mutation_id, EvictionPolicy, ReadError, ResponseField, DO_NOT_STORE};
    use gqlcache_normalizer::TypenameIdResolver;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    fn store() -> NormalizedStore {
        NormalizedStore::in_memory(TypenameIdResolver::new(), StoreConfig::default()).unwrap()
    }

    fn hero_name() -> Operation {
        Operation::query(
            "HeroName",
            SelectionSet::new(vec![ResponseField::object(
                "hero",
                SelectionSet::new(vec![
                    ResponseField::scalar("__typename"),
                    ResponseField::scalar("id"),
                    ResponseField::scalar("name"),
                ]),
            )]),
        )
    }

    fn luke(name: &str) -> Value {
        json!({"hero": {"__typename": "Human", "id": "1000", "name": name}})
    }

    #[test]
    fn test_write_then_read() {
        let store = store();
        let changed = store.write_operation(&hero_name(), &luke("Luke"), &CacheHeaders::none()).unwrap();
        assert!(changed.contains("QUERY_ROOT.hero"));
        assert!(changed.contains("Human:1000.name"));

        let result = store.read_operation(&hero_name(), &CacheHeaders::none()).unwrap();
        assert_eq!(result.data, luke("Luke"));
    }

    #[test]
    fn test_subscribers_see_changes() {
        let store = store();
        let mut rx = store.subscribe();
        store.write_operation(&hero_name(), &luke("Luke"), &CacheHeaders::none()).unwrap();
        assert!(rx.try_recv().unwrap().contains("Human:1000.name"));

        // Rewriting identical data changes nothing and publishes nothing.
        store.write_operation(&hero_name(), &luke("Luke"), &CacheHeaders::none()).unwrap();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_do_not_store_neither_writes_nor_publishes() {
        let store = store();
        let mut rx = store.subscribe();
        let headers = CacheHeaders::builder().add_header(DO_NOT_STORE, "true").build();
        let changed = store.write_operation(&hero_name(), &luke("Luke"), &headers).unwrap();
        assert_eq!(changed.len(), 4);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(store.read_operation(&hero_name(), &CacheHeaders::none()).is_err());
    }

    #[test]
    fn test_optimistic_write_and_rollback() {
        let store = store();
        store.write_operation(&hero_name(), &luke("Luke"), &CacheHeaders::none()).unwrap();

        let id = new_mutation_id();
        store.write_optimistic_updates(&hero_name(), &luke("Optimistic Luke"), id).unwrap();
        let read = store.read_operation(&hero_name(), &CacheHeaders::none()).unwrap();
        assert_eq!(read.data, luke("Optimistic Luke"));

        let changed = store.rollback_optimistic_updates(id).unwrap();
        assert!(changed.contains("Human:1000.name"));
        let read = store.read_operation(&hero_name(), &CacheHeaders::none()).unwrap();
        assert_eq!(read.data, luke("Luke"));
    }

    #[test]
    fn test_fragment_round_trip() {
        let store = store();
        let selections = SelectionSet::new(vec![
            ResponseField::scalar("__typename"),
            ResponseField::scalar("name"),
            ResponseField::scalar("primaryFunction"),
        ]);
        let data = json!({"__typename": "Droid", "name": "R2-D2", "primaryFunction": "Astromech"});
        let changed = store
            .write_fragment(&selections, "Droid:2001", &data, &Variables::new())
            .unwrap();
        assert_eq!(changed.len(), 3);

        let read = store.read_fragment(&selections, "Droid:2001", &Variables::new()).unwrap();
        assert_eq!(read.data, data);
    }

    #[test]
    fn test_remove_makes_read_a_miss() {
        let store = store();
        store.write_operation(&hero_name(), &luke("Luke"), &CacheHeaders::none()).unwrap();
        assert!(store.remove("Human:1000", false).unwrap());

        let err = store.read_operation(&hero_name(), &CacheHeaders::none()).unwrap_err();
        assert!(matches!(
            err,
            gqlcache_core::CacheError::Read(ReadError::DanglingReference { .. })
        ));
    }

    fn hero_location(coordinate: &str) -> Operation {
        Operation::query(
            "HeroLocation",
            SelectionSet::new(vec![ResponseField::object(
                "hero",
                SelectionSet::new(vec![
                    ResponseField::scalar("__typename"),
                    ResponseField::scalar("id"),
                    ResponseField::object(
                        "location",
                        SelectionSet::new(vec![ResponseField::scalar(coordinate)]),
                    ),
                ]),
            )]),
        )
    }

    #[test]
    fn test_overlapping_inline_selections_share_the_object() {
        let store = store();
        let hero = |location: Value| json!({"hero": {"__typename": "Human", "id": "1", "location": location}});
        store
            .write_operation(&hero_location("lat"), &hero(json!({"lat": 51.5})), &CacheHeaders::none())
            .unwrap();
        let changed = store
            .write_operation(&hero_location("lng"), &hero(json!({"lng": -0.1})), &CacheHeaders::none())
            .unwrap();
        assert_eq!(changed, ChangedKeys::from(["Human:1.location".to_string()]));

        let lat = store.read_operation(&hero_location("lat"), &CacheHeaders::none()).unwrap();
        assert_eq!(lat.data, hero(json!({"lat": 51.5})));
        let lng = store.read_operation(&hero_location("lng"), &CacheHeaders::none()).unwrap();
        assert_eq!(lng.data, hero(json!({"lng": -0.1})));
    }

    #[test]
    fn test_clear_all_and_dump() {
        let store = store();
        store.write_operation(&hero_name(), &luke("Luke"), &CacheHeaders::none()).unwrap();
        assert_eq!(store.dump().unwrap()["memory"].len(), 2);
        store.clear_all().unwrap();
        assert!(store.dump().unwrap()["memory"].is_empty());
        assert!(store.load_record("QUERY_ROOT").unwrap().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = StoreConfig::new().with_eviction(EvictionPolicy::unbounded().with_max_entries(0));
        assert!(NormalizedStore::in_memory(TypenameIdResolver::new(), config).is_err());
        assert!(NormalizedStore::in_memory(
            TypenameIdResolver::new(),
            StoreConfig::new().with_change_buffer(0)
        )
        .is_err());
    }
}
