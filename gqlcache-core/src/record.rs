//! Records: the atomic storage unit of the normalized cache.
//!
//! A [`Record`] is a flat bag of named [`FieldValue`]s identified by a key.
//! Relationships between records are expressed with [`CacheReference`]
//! values, never by nesting one record inside another.

use serde_json::{Number, Value};
use std::collections::{btree_map, BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::reference::CacheReference;

// Size heuristics used by the eviction weigher. They only need to be
// consistent, not exact.
const SIZE_OF_BOOLEAN: usize = 16;
const SIZE_OF_NUMBER: usize = 32;
const SIZE_OF_NULL: usize = 4;
const SIZE_OF_LIST_OVERHEAD: usize = 16;
const SIZE_OF_RECORD_OVERHEAD: usize = 16;
const SIZE_OF_REFERENCE_OVERHEAD: usize = 16;

/// A single value stored in a record field.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Link to another record.
    Reference(CacheReference),
    List(Vec<FieldValue>),
    /// Nameless nested map: inline objects and composite custom scalars.
    Object(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Convert raw response JSON into a field value.
    ///
    /// No reference detection happens here; response strings stay strings.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => FieldValue::Number(n.clone()),
            Value::String(s) => FieldValue::String(s.clone()),
            Value::Array(items) => FieldValue::List(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => FieldValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert back into JSON. References become their serialized string.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Number(n) => Value::Number(n.clone()),
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Reference(r) => Value::String(r.serialize()),
            FieldValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            FieldValue::Object(map) => {
                Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// The reference held by this value, including the serialized string form.
    pub fn as_reference(&self) -> Option<CacheReference> {
        match self {
            FieldValue::Reference(r) => Some(r.clone()),
            FieldValue::String(s) => CacheReference::deserialize(s).ok().flatten(),
            _ => None,
        }
    }

    /// Heuristic byte weight of this value.
    pub fn size_estimate(&self) -> usize {
        match self {
            FieldValue::Null => SIZE_OF_NULL,
            FieldValue::Bool(_) => SIZE_OF_BOOLEAN,
            FieldValue::Number(_) => SIZE_OF_NUMBER,
            FieldValue::String(s) => s.len(),
            FieldValue::Reference(r) => SIZE_OF_REFERENCE_OVERHEAD + r.key().len(),
            FieldValue::List(items) => {
                SIZE_OF_LIST_OVERHEAD + items.iter().map(Self::size_estimate).sum::<usize>()
            }
            FieldValue::Object(map) => {
                SIZE_OF_RECORD_OVERHEAD
                    + map
                        .iter()
                        .map(|(k, v)| k.len() + v.size_estimate())
                        .sum::<usize>()
            }
        }
    }

    /// Merge `incoming` into this value, returning true if it changed.
    ///
    /// Inline objects merge key by key, so two selections of the same
    /// unkeyed object keep each other's fields. Anything else is replaced.
    pub fn merge_from(&mut self, incoming: &FieldValue) -> bool {
        match (self, incoming) {
            (FieldValue::Object(existing), FieldValue::Object(incoming)) => {
                let mut changed = false;
                for (name, value) in incoming {
                    match existing.get_mut(name) {
                        Some(current) => changed |= current.merge_from(value),
                        None => {
                            existing.insert(name.clone(), value.clone());
                            changed = true;
                        }
                    }
                }
                changed
            }
            (current, incoming) => {
                if *current == *incoming {
                    return false;
                }
                *current = incoming.clone();
                true
            }
        }
    }

    fn collect_references(&self, out: &mut BTreeSet<String>) {
        match self {
            FieldValue::Reference(r) => {
                out.insert(r.key().to_string());
            }
            FieldValue::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            FieldValue::Object(map) => map.values().for_each(|v| v.collect_references(out)),
            _ => {}
        }
    }
}

// Structural equality. A reference and its serialized string are the same
// value, so a blob decoded by an older codec compares equal to a fresh one.
impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => true,
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
            (FieldValue::Number(a), FieldValue::Number(b)) => a == b,
            (FieldValue::String(a), FieldValue::String(b)) => a == b,
            (FieldValue::Reference(a), FieldValue::Reference(b)) => a == b,
            (FieldValue::Reference(r), FieldValue::String(s))
            | (FieldValue::String(s), FieldValue::Reference(r)) => *s == r.serialize(),
            (FieldValue::List(a), FieldValue::List(b)) => a == b,
            (FieldValue::Object(a), FieldValue::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl From<CacheReference> for FieldValue {
    fn from(reference: CacheReference) -> Self {
        FieldValue::Reference(reference)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Number(n.into())
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(items: Vec<FieldValue>) -> Self {
        FieldValue::List(items)
    }
}

/// Qualified changed-field identifier, `<record key>.<field key>`.
pub fn field_path(record_key: &str, field_key: &str) -> String {
    format!("{}.{}", record_key, field_key)
}

/// Normalized storage unit for one entity or object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    key: String,
    fields: BTreeMap<String, FieldValue>,
    mutation_id: Option<Uuid>,
}

impl Record {
    /// Create an empty record.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
            mutation_id: None,
        }
    }

    /// Create a record from an existing field map.
    pub fn with_fields(key: impl Into<String>, fields: BTreeMap<String, FieldValue>) -> Self {
        Self {
            key: key.into(),
            fields,
            mutation_id: None,
        }
    }

    /// Builder-style field setter.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Tag this record as an optimistic version.
    pub fn with_mutation_id(mut self, mutation_id: Uuid) -> Self {
        self.mutation_id = Some(mutation_id);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mutation_id(&self) -> Option<Uuid> {
        self.mutation_id
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, FieldValue> {
        self.fields
    }

    pub fn get(&self, field_key: &str) -> Option<&FieldValue> {
        self.fields.get(field_key)
    }

    pub fn has_field(&self, field_key: &str) -> bool {
        self.fields.contains_key(field_key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set a single field, replacing any previous value.
    pub fn set(&mut self, field_key: impl Into<String>, value: FieldValue) {
        self.fields.insert(field_key.into(), value);
    }

    /// Union-merge `incoming` into this record.
    ///
    /// Fields missing from `incoming` are left untouched. Returns the names
    /// of fields whose value was added or changed.
    pub fn merge_with(&mut self, incoming: &Record) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        for (name, value) in &incoming.fields {
            match self.fields.entry(name.clone()) {
                btree_map::Entry::Occupied(mut slot) => {
                    if slot.get_mut().merge_from(value) {
                        changed.insert(name.clone());
                    }
                }
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(value.clone());
                    changed.insert(name.clone());
                }
            }
        }
        self.mutation_id = incoming.mutation_id;
        changed
    }

    /// Qualified identifiers for every field of this record.
    pub fn field_paths(&self) -> BTreeSet<String> {
        self.fields
            .keys()
            .map(|name| field_path(&self.key, name))
            .collect()
    }

    /// Heuristic byte weight, used only by eviction.
    pub fn size_estimate(&self) -> usize {
        SIZE_OF_RECORD_OVERHEAD
            + self.key.len()
            + self
                .fields
                .iter()
                .map(|(k, v)| k.len() + v.size_estimate())
                .sum::<usize>()
    }

    /// Keys referenced directly from this record's fields (one hop).
    pub fn referenced_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for value in self.fields.values() {
            value.collect_references(&mut keys);
        }
        keys
    }
}

/// Batch of records keyed by record key, as produced by one normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    records: BTreeMap<String, Record>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record, merging with a previous record of the same key.
    pub fn merge(&mut self, record: Record) -> BTreeSet<String> {
        match self.records.entry(record.key().to_string()) {
            btree_map::Entry::Occupied(mut slot) => slot
                .get_mut()
                .merge_with(&record)
                .into_iter()
                .map(|name| field_path(record.key(), &name))
                .collect(),
            btree_map::Entry::Vacant(slot) => {
                let paths = record.field_paths();
                slot.insert(record);
                paths
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records.into_values().collect()
    }
}

impl FromIterator<Record> for RecordSet {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        let mut set = RecordSet::new();
        for record in iter {
            set.merge(record);
        }
        set
    }
}
