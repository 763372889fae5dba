//! Error types for gqlcache operations

use thiserror::Error;

/// Read-path failures.
///
/// Every variant means "the cache cannot answer this read"; none of them is
/// ever coerced into a `null` value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("Record not found: {key}")]
    RecordMissing { key: String },

    #[error("Dangling reference to {key} from {referenced_by}")]
    DanglingReference { key: String, referenced_by: String },

    #[error("Field {field} absent from record {key}")]
    IncompatibleShape { key: String, field: String },
}

/// Field-value codec errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid record blob: {reason}")]
    InvalidJson { reason: String },

    #[error("Record blob for {key} is not a JSON object")]
    NotAnObject { key: String },

    #[error("Failed to serialize record {key}: {reason}")]
    Serialize { key: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Malformed cache reference: {value}")]
    MalformedReference { value: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("{backend} backend error: {reason}")]
    Backend { backend: String, reason: String },
}

/// Normalization errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Malformed response at {path}: {reason}")]
    MalformedResponse { path: String, reason: String },
}

/// Master error type for all gqlcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Read error: {0}")]
    Read(#[from] ReadError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Normalize error: {0}")]
    Normalize(#[from] NormalizeError),
}

impl CacheError {
    /// True when the error means "no cached value" rather than a broken store.
    ///
    /// Dangling references and shape drift count as misses; the fetch layer
    /// falls back to the network for all of them.
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, CacheError::Read(_))
    }
}

/// Result type alias for gqlcache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
