//! gqlcache Normalizer - Response Normalization and Cache Reads
//!
//! Turns operation responses into flat record sets and rebuilds response
//! data from records. Storage is abstracted behind [`RecordSource`]; this
//! crate never owns records itself.

pub mod key_resolver;
pub mod normalizer;
pub mod reader;

pub use key_resolver::{CacheKeyResolver, DefaultKeyResolver, KeyContext, TypenameIdResolver};
pub use normalizer::{normalize_operation, Normalizer};
pub use reader::{read_operation, ReadResult, RecordReader, RecordSource};
