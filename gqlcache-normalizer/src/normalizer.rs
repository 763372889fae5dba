//! Response normalization.
//!
//! Walks response data depth-first alongside its [`SelectionSet`] and emits a
//! flat [`RecordSet`]. Keyed objects become records of their own, linked by
//! [`CacheReference`]s; unkeyed objects are embedded in their parent as
//! nested maps under the field's storage key.

use gqlcache_core::{
    CacheKey, CacheReference, CacheResult, FieldKind, FieldValue, NormalizeError, Operation,
    Record, RecordSet, ResponseField, SelectionSet, Variables, TYPENAME_FIELD,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::key_resolver::{CacheKeyResolver, KeyContext};

/// Normalizes one response against one selection plan.
pub struct Normalizer<'a> {
    resolver: &'a dyn CacheKeyResolver,
    variables: &'a Variables,
    records: RecordSet,
}

impl<'a> Normalizer<'a> {
    pub fn new(resolver: &'a dyn CacheKeyResolver, variables: &'a Variables) -> Self {
        Self {
            resolver,
            variables,
            records: RecordSet::new(),
        }
    }

    /// Normalize `data` as the object stored under `root_key`.
    pub fn normalize(mut self, root_key: &str, selections: &SelectionSet, data: &Value) -> CacheResult<RecordSet> {
        let Value::Object(object) = data else {
            return Err(malformed(root_key, "response data is not an object"));
        };
        let fields = self.normalize_fields(root_key, selections, object, root_key)?;
        self.records.merge(Record::with_fields(root_key, fields));
        Ok(self.records)
    }

    fn normalize_fields(
        &mut self,
        record_key: &str,
        selections: &SelectionSet,
        object: &Map<String, Value>,
        path: &str,
    ) -> CacheResult<BTreeMap<String, FieldValue>> {
        let typename = object.get(TYPENAME_FIELD).and_then(Value::as_str);
        let mut fields = BTreeMap::new();

        for field in selections.fields_for(typename) {
            if field.is_skipped(self.variables) {
                continue;
            }
            let Some(value) = object.get(&field.response_name) else {
                continue;
            };
            let field_path = format!("{}.{}", path, field.response_name);
            let stored = self.normalize_value(record_key, field, &field.kind, value, &field_path)?;
            insert_field(&mut fields, field.cache_key(self.variables), stored);
        }

        Ok(fields)
    }

    fn normalize_value(
        &mut self,
        record_key: &str,
        field: &ResponseField,
        kind: &FieldKind,
        value: &Value,
        path: &str,
    ) -> CacheResult<FieldValue> {
        if value.is_null() {
            return Ok(FieldValue::Null);
        }
        match kind {
            FieldKind::Scalar => Ok(FieldValue::from_json(value)),
            FieldKind::List(inner) => {
                let Value::Array(items) = value else {
                    return Err(malformed(path, "expected a list"));
                };
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let item_path = format!("{}[{}]", path, i);
                        self.normalize_value(record_key, field, inner, item, &item_path)
                    })
                    .collect::<CacheResult<Vec<_>>>()
                    .map(FieldValue::List)
            }
            FieldKind::Object(selections) => {
                let Value::Object(object) = value else {
                    return Err(malformed(path, "expected an object"));
                };
                let ctx = KeyContext::new(field, self.variables, record_key);
                match self.resolver.from_field_record_set(&ctx, object) {
                    CacheKey::NoKey => {
                        let nested = self.normalize_fields(record_key, selections, object, path)?;
                        Ok(FieldValue::Object(nested))
                    }
                    CacheKey::Key(key) => {
                        let nested = self.normalize_fields(&key, selections, object, &key)?;
                        self.records.merge(Record::with_fields(key.clone(), nested));
                        Ok(FieldValue::Reference(CacheReference::new(key)))
                    }
                }
            }
        }
    }
}

// The same field can be selected twice (directly and through a fragment);
// inline maps from both selections are combined.
fn insert_field(fields: &mut BTreeMap<String, FieldValue>, field_key: String, value: FieldValue) {
    match fields.get_mut(&field_key) {
        Some(existing) => {
            existing.merge_from(&value);
        }
        None => {
            fields.insert(field_key, value);
        }
    }
}

fn malformed(path: &str, reason: &str) -> gqlcache_core::CacheError {
    NormalizeError::MalformedResponse {
        path: path.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Normalize an operation's response data under its root key.
pub fn normalize_operation(
    operation: &Operation,
    data: &Value,
    resolver: &dyn CacheKeyResolver,
) -> CacheResult<RecordSet> {
    let records = Normalizer::new(resolver, &operation.variables).normalize(
        operation.root_key(),
        &operation.selections,
        data,
    )?;
    tracing::debug!(
        operation = %operation.name,
        records = records.len(),
        "Normalized response"
    );
    Ok(records)
}
