//! Denormalization: rebuilding response data from records.
//!
//! [`RecordReader`] walks a [`SelectionSet`] starting at a root record and
//! follows [`CacheReference`](gqlcache_core::CacheReference)s through a
//! [`RecordSource`]. Any gap in the graph aborts the whole read; a partial
//! object is never returned.

use gqlcache_core::{
    field_path, CacheHeaders, CacheKey, CacheResult, ChangedKeys, FieldKind, FieldValue, Operation,
    ReadError, Record, ResponseField, SelectionSet, Variables, TYPENAME_FIELD,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::key_resolver::{CacheKeyResolver, KeyContext};

/// Anything records can be loaded from.
pub trait RecordSource {
    fn load_record(&self, key: &str, headers: &CacheHeaders) -> CacheResult<Option<Record>>;
}

impl<S: RecordSource + ?Sized> RecordSource for &S {
    fn load_record(&self, key: &str, headers: &CacheHeaders) -> CacheResult<Option<Record>> {
        (**self).load_record(key, headers)
    }
}

/// Data read from the cache plus the fields it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    pub data: Value,
    /// Every `<record key>.<field key>` consulted by the read.
    pub dependent_keys: BTreeSet<String>,
}

impl ReadResult {
    /// True if any of `changed` could alter this result.
    pub fn depends_on(&self, changed: &ChangedKeys) -> bool {
        !self.dependent_keys.is_disjoint(changed)
    }
}

pub struct RecordReader<'a> {
    source: &'a dyn RecordSource,
    resolver: &'a dyn CacheKeyResolver,
    variables: &'a Variables,
    headers: CacheHeaders,
}

impl<'a> RecordReader<'a> {
    pub fn new(
        source: &'a dyn RecordSource,
        resolver: &'a dyn CacheKeyResolver,
        variables: &'a Variables,
    ) -> Self {
        Self {
            source,
            resolver,
            variables,
            headers: CacheHeaders::none(),
        }
    }

    pub fn with_headers(mut self, headers: CacheHeaders) -> Self {
        self.headers = headers;
        self
    }

    /// Read `selections` starting at the record stored under `root_key`.
    pub fn read_selection(&self, root_key: &str, selections: &SelectionSet) -> CacheResult<ReadResult> {
        let root = self
            .source
            .load_record(root_key, &self.headers)?
            .ok_or_else(|| ReadError::RecordMissing {
                key: root_key.to_string(),
            })?;

        let mut dependent_keys = BTreeSet::new();
        let data = self.read_fields(root.key(), root.fields(), selections, &mut dependent_keys)?;
        Ok(ReadResult {
            data,
            dependent_keys,
        })
    }

    fn read_fields(
        &self,
        record_key: &str,
        fields: &BTreeMap<String, FieldValue>,
        selections: &SelectionSet,
        dependent_keys: &mut BTreeSet<String>,
    ) -> CacheResult<Value> {
        let typename = match fields.get(TYPENAME_FIELD) {
            Some(FieldValue::String(t)) => Some(t.as_str()),
            _ => None,
        };
        let mut out = Map::new();

        for field in selections.fields_for(typename) {
            if field.is_skipped(self.variables) {
                continue;
            }
            let field_key = field.cache_key(self.variables);
            dependent_keys.insert(field_path(record_key, &field_key));

            if let Some(redirected) = self.redirect(record_key, field)? {
                if let FieldKind::Object(nested) = &field.kind {
                    let value = self.read_fields(redirected.key(), redirected.fields(), nested, dependent_keys)?;
                    out.insert(field.response_name.clone(), value);
                    continue;
                }
            }

            let value = fields.get(&field_key).ok_or_else(|| ReadError::IncompatibleShape {
                key: record_key.to_string(),
                field: field_key.clone(),
            })?;
            let referenced_by = field_path(record_key, &field_key);
            let json = self.read_value(record_key, &referenced_by, &field.kind, value, dependent_keys)?;
            out.insert(field.response_name.clone(), json);
        }

        Ok(Value::Object(out))
    }

    // Entity named directly by the field's arguments, when it is cached.
    fn redirect(&self, record_key: &str, field: &ResponseField) -> CacheResult<Option<Record>> {
        if !matches!(field.kind, FieldKind::Object(_)) {
            return Ok(None);
        }
        let ctx = KeyContext::new(field, self.variables, record_key);
        match self.resolver.from_field_arguments(&ctx) {
            CacheKey::NoKey => Ok(None),
            CacheKey::Key(key) => self.source.load_record(&key, &self.headers),
        }
    }

    fn read_value(
        &self,
        record_key: &str,
        referenced_by: &str,
        kind: &FieldKind,
        value: &FieldValue,
        dependent_keys: &mut BTreeSet<String>,
    ) -> CacheResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let incompatible = || ReadError::IncompatibleShape {
            key: record_key.to_string(),
            field: referenced_by.to_string(),
        };

        match kind {
            FieldKind::Scalar => Ok(value.to_json()),
            FieldKind::List(inner) => {
                let FieldValue::List(items) = value else {
                    return Err(incompatible().into());
                };
                items
                    .iter()
                    .map(|item| self.read_value(record_key, referenced_by, inner, item, dependent_keys))
                    .collect::<CacheResult<Vec<_>>>()
                    .map(Value::Array)
            }
            FieldKind::Object(selections) => {
                if let FieldValue::Object(map) = value {
                    return self.read_fields(record_key, map, selections, dependent_keys);
                }
                let reference = value.as_reference().ok_or_else(incompatible)?;
                let record = self
                    .source
                    .load_record(reference.key(), &self.headers)?
                    .ok_or_else(|| ReadError::DanglingReference {
                        key: reference.key().to_string(),
                        referenced_by: referenced_by.to_string(),
                    })?;
                self.read_fields(record.key(), record.fields(), selections, dependent_keys)
            }
        }
    }
}

/// Read an operation's data from its root record.
pub fn read_operation(
    source: &dyn RecordSource,
    operation: &Operation,
    resolver: &dyn CacheKeyResolver,
    headers: &CacheHeaders,
) -> CacheResult<ReadResult> {
    let result = RecordReader::new(source, resolver, &operation.variables)
        .with_headers(headers.clone())
        .read_selection(operation.root_key(), &operation.selections)?;
    tracing::debug!(
        operation = %operation.name,
        dependent_keys = result.dependent_keys.len(),
        "Read operation from cache"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_resolver::TypenameIdResolver;
    use crate::normalizer::normalize_operation;
    use gqlcache_core::{variable, CacheError, CacheReference, Condition, RecordSet};
    use proptest::prelude::*;
    use serde_json::json;
    use std::cell::RefCell;

    #[derive(Default)]
    struct MapSource {
        records: BTreeMap<String, Record>,
        loads: RefCell<Vec<String>>,
    }

    impl MapSource {
        fn from_set(set: RecordSet) -> Self {
            Self {
                records: set.into_records().into_iter().map(|r| (r.key().to_string(), r)).collect(),
                loads: RefCell::new(Vec::new()),
            }
        }

        fn insert(&mut self, record: Record) {
            self.records.insert(record.key().to_string(), record);
        }
    }

    impl RecordSource for MapSource {
        fn load_record(&self, key: &str, _headers: &CacheHeaders) -> CacheResult<Option<Record>> {
            self.loads.borrow_mut().push(key.to_string());
            Ok(self.records.get(key).cloned())
        }
    }

    fn character() -> SelectionSet {
        SelectionSet::new(vec![
            ResponseField::scalar("__typename"),
            ResponseField::scalar("id"),
            ResponseField::scalar("name"),
        ])
    }

    fn hero_with_friends() -> Operation {
        Operation::query(
            "HeroAndFriends",
            SelectionSet::new(vec![ResponseField::object(
                "hero",
                SelectionSet::new(vec![
                    ResponseField::scalar("__typename"),
                    ResponseField::scalar("id"),
                    ResponseField::scalar("name"),
                    ResponseField::list("friends", FieldKind::Object(character())),
                ]),
            )]),
        )
    }

    fn hero_data() -> Value {
        json!({"hero": {
            "__typename": "Human", "id": "1000", "name": "Luke",
            "friends": [
                {"__typename": "Human", "id": "1003", "name": "Leia"},
                {"__typename": "Droid", "id": "2001", "name": "R2-D2"},
            ]
        }})
    }

    #[test]
    fn test_read_reassembles_normalized_response() {
        let op = hero_with_friends();
        let resolver = TypenameIdResolver::new();
        let source = MapSource::from_set(normalize_operation(&op, &hero_data(), &resolver).unwrap());

        let result = read_operation(&source, &op, &resolver, &CacheHeaders::none()).unwrap();
        assert_eq!(result.data, hero_data());
        assert!(result.dependent_keys.contains("QUERY_ROOT.hero"));
        assert!(result.dependent_keys.contains("Human:1003.name"));
    }

    #[test]
    fn test_depends_on_changed_keys() {
        let op = hero_with_friends();
        let resolver = TypenameIdResolver::new();
        let source = MapSource::from_set(normalize_operation(&op, &hero_data(), &resolver).unwrap());
        let result = read_operation(&source, &op, &resolver, &CacheHeaders::none()).unwrap();

        let leia_renamed: ChangedKeys = ["Human:1003.name".to_string()].into_iter().collect();
        let unrelated: ChangedKeys = ["Starship:3000.name".to_string()].into_iter().collect();
        assert!(result.depends_on(&leia_renamed));
        assert!(!result.depends_on(&unrelated));
    }

    #[test]
    fn test_missing_root_is_cache_miss() {
        let source = MapSource::default();
        let err = read_operation(&source, &hero_with_friends(), &TypenameIdResolver::new(), &CacheHeaders::none())
            .unwrap_err();
        assert!(err.is_cache_miss());
        assert_eq!(
            err,
            CacheError::Read(ReadError::RecordMissing {
                key: "QUERY_ROOT".to_string()
            })
        );
    }

    #[test]
    fn test_dangling_reference_is_miss_not_null() {
        let op = hero_with_friends();
        let resolver = TypenameIdResolver::new();
        let mut source = MapSource::from_set(normalize_operation(&op, &hero_data(), &resolver).unwrap());
        source.records.remove("Human:1003");

        let err = read_operation(&source, &op, &resolver, &CacheHeaders::none()).unwrap_err();
        assert_eq!(
            err,
            CacheError::Read(ReadError::DanglingReference {
                key: "Human:1003".to_string(),
                referenced_by: "Human:1000.friends".to_string(),
            })
        );
    }

    #[test]
    fn test_absent_field_is_incompatible_shape() {
        let mut source = MapSource::default();
        source.insert(Record::new("QUERY_ROOT").field("hero", CacheReference::new("Human:1000")));
        source.insert(
            Record::new("Human:1000")
                .field("__typename", "Human")
                .field("id", "1000"),
        );

        let op = hero_with_friends();
        let err = read_operation(&source, &op, &TypenameIdResolver::new(), &CacheHeaders::none()).unwrap_err();
        assert!(err.is_cache_miss());
        assert_eq!(
            err,
            CacheError::Read(ReadError::IncompatibleShape {
                key: "Human:1000".to_string(),
                field: "name".to_string(),
            })
        );
    }

    #[test]
    fn test_present_null_reads_as_null() {
        let mut source = MapSource::default();
        source.insert(Record::new("QUERY_ROOT").field("hero", FieldValue::Null));
        let op = Operation::query(
            "Hero",
            SelectionSet::new(vec![ResponseField::object("hero", character())]),
        );
        let result = read_operation(&source, &op, &TypenameIdResolver::new(), &CacheHeaders::none()).unwrap();
        assert_eq!(result.data, json!({"hero": null}));
    }

    #[test]
    fn test_skipped_field_is_not_looked_up() {
        let mut source = MapSource::default();
        source.insert(Record::new("QUERY_ROOT").field("name", "Luke"));
        let op = Operation::query(
            "Conditional",
            SelectionSet::new(vec![
                ResponseField::scalar("name"),
                ResponseField::object("hero", character()).condition(Condition::Skip("noHero".into())),
            ]),
        )
        .with_variables(Variables::new().with("noHero", true));

        let result = read_operation(&source, &op, &TypenameIdResolver::new(), &CacheHeaders::none()).unwrap();
        assert_eq!(result.data, json!({"name": "Luke"}));
        assert_eq!(*source.loads.borrow(), vec!["QUERY_ROOT".to_string()]);
    }

    #[test]
    fn test_skipped_on_write_then_required_is_miss() {
        let op = |include: bool| {
            Operation::query(
                "Hero",
                SelectionSet::new(vec![
                    ResponseField::scalar("name"),
                    ResponseField::scalar("height").condition(Condition::Include("withHeight".into())),
                ]),
            )
            .with_variables(Variables::new().with("withHeight", include))
        };
        let resolver = TypenameIdResolver::new();
        let written = normalize_operation(&op(false), &json!({"name": "Luke"}), &resolver).unwrap();
        let source = MapSource::from_set(written);

        let err = read_operation(&source, &op(true), &resolver, &CacheHeaders::none()).unwrap_err();
        assert!(err.is_cache_miss());
    }

    #[test]
    fn test_argument_redirect_reads_entity_from_other_query() {
        let resolver = TypenameIdResolver::new().with_redirect("human", "Human");
        let source = MapSource::from_set(
            normalize_operation(&hero_with_friends(), &hero_data(), &resolver).unwrap(),
        );

        let human = Operation::query(
            "Human",
            SelectionSet::new(vec![
                ResponseField::object("human", character()).argument("id", variable("id"))
            ]),
        )
        .with_variables(Variables::new().with("id", "1003"));

        let result = read_operation(&source, &human, &resolver, &CacheHeaders::none()).unwrap();
        assert_eq!(
            result.data,
            json!({"human": {"__typename": "Human", "id": "1003", "name": "Leia"}})
        );
    }

    #[test]
    fn test_inline_object_read_in_place() {
        let op = Operation::query(
            "Hero",
            SelectionSet::new(vec![ResponseField::object(
                "hero",
                SelectionSet::new(vec![ResponseField::scalar("name")]),
            )]),
        );
        let data = json!({"hero": {"name": "Luke"}});
        let resolver = TypenameIdResolver::new();
        let source = MapSource::from_set(normalize_operation(&op, &data, &resolver).unwrap());

        let result = read_operation(&source, &op, &resolver, &CacheHeaders::none()).unwrap();
        assert_eq!(result.data, data);
        assert_eq!(source.records.len(), 1);
    }

    #[test]
    fn test_fragment_fields_follow_stored_typename() {
        let selections = SelectionSet::new(vec![
            ResponseField::scalar("__typename"),
            ResponseField::scalar("name"),
        ])
        .on(&["Droid"], SelectionSet::new(vec![ResponseField::scalar("primaryFunction")]));

        let mut source = MapSource::default();
        source.insert(
            Record::new("Human:1000")
                .field("__typename", "Human")
                .field("name", "Luke"),
        );
        let variables = Variables::new();
        let resolver = TypenameIdResolver::new();
        let reader = RecordReader::new(&source, &resolver, &variables);

        let result = reader.read_selection("Human:1000", &selections).unwrap();
        assert_eq!(result.data, json!({"__typename": "Human", "name": "Luke"}));
    }

    proptest! {
        /// Reading back a normalized response reproduces it.
        #[test]
        fn prop_normalize_then_read_reproduces_data(
            friends in proptest::collection::btree_map(2000u32..3000, "[A-Za-z ]{0,12}", 0..12)
        ) {
            let friends: Vec<Value> = friends
                .iter()
                .map(|(id, name)| json!({"__typename": "Human", "id": id.to_string(), "name": name}))
                .collect();
            let data = json!({"hero": {
                "__typename": "Human", "id": "1000", "name": "Luke", "friends": friends,
            }});

            let op = hero_with_friends();
            let resolver = TypenameIdResolver::new();
            let source = MapSource::from_set(normalize_operation(&op, &data, &resolver).unwrap());
            let result = read_operation(&source, &op, &resolver, &CacheHeaders::none()).unwrap();
            prop_assert_eq!(result.data, data);
        }
    }
}
