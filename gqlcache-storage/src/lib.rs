//! gqlcache Storage - Record Layers and Store Facade
//!
//! Layered record storage for the normalized cache: a bounded in-memory
//! layer, durable LMDB and SQLite layers, the chain that composes them, the
//! optimistic overlay and the [`NormalizedStore`] that application code
//! talks to.

pub mod broadcast;
pub mod chain;
pub mod lmdb;
pub mod memory;
pub mod optimistic;
pub mod sql;
pub mod store;
pub mod traits;

pub use broadcast::{next_changes, ChangeBroadcaster};
pub use chain::{CacheChain, CacheChainBuilder};
pub use lmdb::{LmdbCacheError, LmdbNormalizedCache, LMDB_LAYER};
pub use memory::{MemoryNormalizedCache, MEMORY_LAYER};
pub use optimistic::{OptimisticCache, RecordJournal, OPTIMISTIC_LAYER};
pub use sql::{SqlCacheError, SqlNormalizedCache, SQL_LAYER};
pub use store::NormalizedStore;
pub use traits::{merge_record, CacheDump, CacheStats, NormalizedCache};
