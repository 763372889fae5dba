//! gqlcache Core - Record Model and Shared Types
//!
//! Data types shared by every gqlcache crate: records and their field
//! values, keys and references, the durable field-value codec, per-call
//! headers, the field-descriptor plan produced by code generation,
//! configuration and the error taxonomy.

pub mod codec;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod headers;
pub mod record;
pub mod reference;

pub use config::{EvictionPolicy, StoreConfig, DEFAULT_CHANGE_BUFFER};
pub use descriptor::{
    resolve_argument, variable, Condition, FieldKind, InlineFragment, Operation, OperationKind,
    ResponseField, SelectionSet, Variables, MUTATION_ROOT_KEY, QUERY_ROOT_KEY, TYPENAME_FIELD,
};
pub use error::{
    CacheError, CacheResult, CodecError, ConfigError, NormalizeError, ReadError, StorageError,
};
pub use headers::{CacheHeaders, CacheHeadersBuilder, DO_NOT_STORE, EVICT_AFTER_READ};
pub use record::{field_path, FieldValue, Record, RecordSet};
pub use reference::{CacheKey, CacheReference};

use std::collections::BTreeSet;

/// Set of changed-field identifiers, `<record key>.<field key>`.
pub type ChangedKeys = BTreeSet<String>;

/// Mutation identifier tagging optimistic record versions.
pub type MutationId = uuid::Uuid;

/// Generate a new mutation id (timestamp-sortable UUIDv7).
pub fn new_mutation_id() -> MutationId {
    uuid::Uuid::now_v7()
}
