//! Field-value codec for durable layers.
//!
//! A record's field map is stored as one JSON object. References are written
//! as their `ApolloCacheReference{<key>}` string and reconstructed on decode;
//! every other variant maps to the matching JSON shape.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{CacheError, CacheResult, CodecError};
use crate::record::{FieldValue, Record};
use crate::reference::CacheReference;

/// Encode a field map into its JSON blob.
pub fn encode_fields(key: &str, fields: &BTreeMap<String, FieldValue>) -> Result<String, CodecError> {
    let object: Map<String, Value> = fields
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();
    serde_json::to_string(&Value::Object(object)).map_err(|e| CodecError::Serialize {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Encode a record's fields.
pub fn encode_record(record: &Record) -> Result<String, CodecError> {
    encode_fields(record.key(), record.fields())
}

/// Decode a JSON blob back into a field map.
///
/// Fails with a `CodecError` on unparsable input and with a `ConfigError`
/// when a string carries the reference prefix but is malformed.
pub fn decode_fields(key: &str, blob: &str) -> CacheResult<BTreeMap<String, FieldValue>> {
    let value: Value = serde_json::from_str(blob).map_err(|e| CodecError::InvalidJson {
        reason: e.to_string(),
    })?;
    let Value::Object(object) = value else {
        return Err(CodecError::NotAnObject {
            key: key.to_string(),
        }
        .into());
    };
    object
        .iter()
        .map(|(name, value)| Ok::<_, CacheError>((name.clone(), decode_value(value)?)))
        .collect()
}

/// Decode a blob into a record stored under `key`.
pub fn decode_record(key: &str, blob: &str) -> CacheResult<Record> {
    Ok(Record::with_fields(key, decode_fields(key, blob)?))
}

fn decode_value(value: &Value) -> CacheResult<FieldValue> {
    Ok(match value {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Number(n) => FieldValue::Number(n.clone()),
        Value::String(s) => match CacheReference::deserialize(s)? {
            Some(reference) => FieldValue::Reference(reference),
            None => FieldValue::String(s.clone()),
        },
        Value::Array(items) => FieldValue::List(
            items
                .iter()
                .map(decode_value)
                .collect::<CacheResult<Vec<_>>>()?,
        ),
        Value::Object(map) => FieldValue::Object(
            map.iter()
                .map(|(k, v)| Ok::<_, CacheError>((k.clone(), decode_value(v)?)))
                .collect::<CacheResult<BTreeMap<_, _>>>()?,
        ),
    })
}
