//! Fetch-layer errors.

use gqlcache_core::CacheError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The transport failed or returned no usable data.
    #[error("Network error: {reason}")]
    Network { reason: String },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// A blocking cache task panicked or was cancelled.
    #[error("Cache task failed: {reason}")]
    Join { reason: String },
}

impl FetchError {
    pub fn network(reason: impl Into<String>) -> Self {
        FetchError::Network {
            reason: reason.into(),
        }
    }

    /// True for cache reads that found nothing usable.
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, FetchError::Cache(e) if e.is_cache_miss())
    }
}

impl From<tokio::task::JoinError> for FetchError {
    fn from(e: tokio::task::JoinError) -> Self {
        FetchError::Join {
            reason: e.to_string(),
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
