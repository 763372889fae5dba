//! gqlcache Test Utilities
//!
//! Shared test infrastructure for the gqlcache workspace:
//! - Proptest generators for field values, records and record sets
//! - Star Wars style operations and response fixtures
//! - A scripted mock network transport
//! - Assertions for the cache error taxonomy
//! - Test logging

pub use gqlcache_core::{
    CacheError, CacheHeaders, CacheReference, CacheResult, FieldValue, Operation, ReadError,
    Record, RecordSet, ResponseField, SelectionSet, Variables,
};
pub use gqlcache_fetch::{FetchError, FetchResult, NetworkRequest, NetworkTransport};
pub use gqlcache_normalizer::TypenameIdResolver;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

// ============================================================================
// LOGGING
// ============================================================================

/// Install a test subscriber honoring `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_test_writer().with_target(true))
        .try_init();
}

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

/// Network transport replaying scripted results per operation name.
///
/// Each operation has its own queue. When a queue runs dry the transport
/// fails with a network error, so tests notice unexpected requests.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<FetchResult<Value>>>>,
    requests: Mutex<Vec<NetworkRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a successful `data` response for `operation`.
    pub fn respond(self, operation: &str, data: Value) -> Self {
        self.push(operation, Ok(data));
        self
    }

    /// Queue a network failure for `operation`.
    pub fn fail(self, operation: &str, reason: &str) -> Self {
        self.push(operation, Err(FetchError::network(reason)));
        self
    }

    pub fn push(&self, operation: &str, result: FetchResult<Value>) {
        Self::lock(&self.scripts)
            .entry(operation.to_string())
            .or_default()
            .push_back(result);
    }

    /// Number of requests served so far.
    pub fn calls(&self) -> usize {
        Self::lock(&self.requests).len()
    }

    pub fn calls_for(&self, operation: &str) -> usize {
        Self::lock(&self.requests)
            .iter()
            .filter(|r| r.operation.name == operation)
            .count()
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<NetworkRequest> {
        Self::lock(&self.requests).clone()
    }
}

#[async_trait]
impl NetworkTransport for MockTransport {
    async fn execute(&self, request: &NetworkRequest) -> FetchResult<Value> {
        Self::lock(&self.requests).push(request.clone());
        let name = &request.operation.name;
        let next = Self::lock(&self.scripts)
            .get_mut(name)
            .and_then(VecDeque::pop_front);
        tracing::debug!(operation = %name, scripted = next.is_some(), "Mock transport request");
        next.unwrap_or_else(|| Err(FetchError::network(format!("no mock response for {}", name))))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Generate a record key of the form `Type:id`.
    pub fn arb_record_key() -> impl Strategy<Value = String> {
        ("[A-Z][a-z]{2,8}", 1u32..10_000).prop_map(|(typename, id)| format!("{}:{}", typename, id))
    }

    /// Generate a field name.
    pub fn arb_field_name() -> impl Strategy<Value = String> {
        "[a-z][a-zA-Z]{0,9}"
    }

    /// Generate a leaf field value, references included.
    pub fn arb_scalar_value() -> impl Strategy<Value = FieldValue> {
        prop_oneof![
            Just(FieldValue::Null),
            any::<bool>().prop_map(FieldValue::Bool),
            any::<i64>().prop_map(FieldValue::from),
            "[ -~]{0,16}".prop_map(FieldValue::String),
            arb_record_key().prop_map(|k| FieldValue::Reference(CacheReference::new(k))),
        ]
    }

    /// Generate a field value with nested lists and inline objects.
    pub fn arb_field_value() -> impl Strategy<Value = FieldValue> {
        arb_scalar_value().prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(FieldValue::List),
                prop::collection::btree_map(arb_field_name(), inner, 0..4).prop_map(FieldValue::Object),
            ]
        })
    }

    /// Generate a record under `key`.
    pub fn arb_record_with_key(key: String) -> impl Strategy<Value = Record> {
        prop::collection::btree_map(arb_field_name(), arb_field_value(), 0..8)
            .prop_map(move |fields| Record::with_fields(key.clone(), fields))
    }

    /// Generate a record with a random key.
    pub fn arb_record() -> impl Strategy<Value = Record> {
        arb_record_key().prop_flat_map(arb_record_with_key)
    }

    /// Generate a record set of up to `max` records.
    pub fn arb_record_set(max: usize) -> impl Strategy<Value = RecordSet> {
        prop::collection::vec(arb_record(), 0..max).prop_map(|records| records.into_iter().collect())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use gqlcache_core::{variable, Condition, FieldKind};
    use serde_json::json;

    fn character_fields() -> Vec<ResponseField> {
        vec![
            ResponseField::scalar("__typename"),
            ResponseField::scalar("id"),
            ResponseField::scalar("name"),
        ]
    }

    /// Resolver keying by `__typename:id` with `human(id:)` and
    /// `droid(id:)` redirects.
    pub fn star_wars_resolver() -> TypenameIdResolver {
        TypenameIdResolver::new()
            .with_redirect("human", "Human")
            .with_redirect("droid", "Droid")
    }

    /// `query HeroName { hero { __typename id name } }`
    pub fn hero_name_query() -> Operation {
        Operation::query(
            "HeroName",
            SelectionSet::new(vec![ResponseField::object("hero", SelectionSet::new(character_fields()))]),
        )
    }

    /// `query HeroAndFriends { hero { __typename id name friends { __typename id name } } }`
    pub fn hero_and_friends_query() -> Operation {
        let mut hero = character_fields();
        hero.push(ResponseField::list(
            "friends",
            FieldKind::Object(SelectionSet::new(character_fields())),
        ));
        Operation::query(
            "HeroAndFriends",
            SelectionSet::new(vec![ResponseField::object("hero", SelectionSet::new(hero))]),
        )
    }

    /// `query HeroByEpisode($episode) { hero(episode: $episode) { ... } }`
    pub fn hero_by_episode_query(episode: &str) -> Operation {
        Operation::query(
            "HeroByEpisode",
            SelectionSet::new(vec![ResponseField::object("hero", SelectionSet::new(character_fields()))
                .argument("episode", variable("episode"))]),
        )
        .with_variables(Variables::new().with("episode", episode))
    }

    /// `query Human($id) { human(id: $id) { __typename id name } }`
    pub fn human_query(id: &str) -> Operation {
        Operation::query(
            "Human",
            SelectionSet::new(vec![ResponseField::object("human", SelectionSet::new(character_fields()))
                .argument("id", variable("id"))]),
        )
        .with_variables(Variables::new().with("id", id))
    }

    /// Hero with an optional `friends` list guarded by `@include(if: $withFriends)`.
    pub fn hero_with_optional_friends_query(with_friends: bool) -> Operation {
        let mut hero = character_fields();
        hero.push(
            ResponseField::list("friends", FieldKind::Object(SelectionSet::new(character_fields())))
                .condition(Condition::Include("withFriends".to_string())),
        );
        Operation::query(
            "HeroWithOptionalFriends",
            SelectionSet::new(vec![ResponseField::object("hero", SelectionSet::new(hero))]),
        )
        .with_variables(Variables::new().with("withFriends", with_friends))
    }

    /// `mutation UpdateHuman($id, $name) { updateHuman(id: $id, name: $name) { __typename id name } }`
    pub fn update_human_mutation(id: &str, name: &str) -> Operation {
        Operation::mutation(
            "UpdateHuman",
            SelectionSet::new(vec![ResponseField::object("updateHuman", SelectionSet::new(character_fields()))
                .argument("id", variable("id"))
                .argument("name", variable("name"))]),
        )
        .with_variables(Variables::new().with("id", id).with("name", name))
    }

    pub fn character(typename: &str, id: &str, name: &str) -> Value {
        json!({"__typename": typename, "id": id, "name": name})
    }

    pub fn luke() -> Value {
        character("Human", "1000", "Luke Skywalker")
    }

    pub fn han() -> Value {
        character("Human", "1002", "Han Solo")
    }

    pub fn leia() -> Value {
        character("Human", "1003", "Leia Organa")
    }

    pub fn r2d2() -> Value {
        character("Droid", "2001", "R2-D2")
    }

    /// `HeroName` data with `hero` set to `hero`.
    pub fn hero_name_data(hero: Value) -> Value {
        json!({ "hero": hero })
    }

    /// `HeroAndFriends` data: R2-D2 with Luke, Han and Leia.
    pub fn hero_and_friends_data() -> Value {
        let mut hero = r2d2();
        hero["friends"] = json!([luke(), han(), leia()]);
        json!({ "hero": hero })
    }

    pub fn update_human_data(id: &str, name: &str) -> Value {
        json!({ "updateHuman": character("Human", id, name) })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    /// Assert the read failed with a cache-miss class error.
    pub fn assert_cache_miss<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(e) if e.is_cache_miss() => {}
            other => panic!("Expected cache miss, got {:?}", other),
        }
    }

    /// Assert a reference from `referenced_by` pointed at a missing `key`.
    pub fn assert_dangling_reference<T: std::fmt::Debug>(result: &CacheResult<T>, key: &str) {
        match result {
            Err(CacheError::Read(ReadError::DanglingReference { key: missing, .. })) if missing == key => {}
            other => panic!("Expected dangling reference to {}, got {:?}", key, other),
        }
    }

    pub fn assert_network_error<T: std::fmt::Debug>(result: &FetchResult<T>) {
        match result {
            Err(FetchError::Network { .. }) => {}
            other => panic!("Expected network error, got {:?}", other),
        }
    }
}
