//! Configuration types

use std::time::Duration;

use crate::error::{CacheResult, ConfigError};

/// Default capacity of the changed-key broadcast buffer.
pub const DEFAULT_CHANGE_BUFFER: usize = 256;

/// Bounds for the in-memory record layer.
///
/// Every bound is optional and they compose; with none set nothing is ever
/// evicted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Maximum total weight (record size estimate plus key length).
    pub max_size_bytes: Option<u64>,
    /// Maximum number of records.
    pub max_entries: Option<u64>,
    /// Expire a record this long after its last read or write.
    pub expire_after_access: Option<Duration>,
    /// Expire a record this long after its last write.
    pub expire_after_write: Option<Duration>,
}

impl EvictionPolicy {
    /// Policy with no bounds.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_size_bytes(mut self, bytes: u64) -> Self {
        self.max_size_bytes = Some(bytes);
        self
    }

    pub fn with_max_entries(mut self, entries: u64) -> Self {
        self.max_entries = Some(entries);
        self
    }

    pub fn with_expire_after_access(mut self, duration: Duration) -> Self {
        self.expire_after_access = Some(duration);
        self
    }

    pub fn with_expire_after_write(mut self, duration: Duration) -> Self {
        self.expire_after_write = Some(duration);
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self == &Self::unbounded()
    }

    /// Create from environment variables with fallback to unbounded.
    ///
    /// Environment variables:
    /// - `GQLCACHE_MAX_SIZE_BYTES`: maximum total weight
    /// - `GQLCACHE_MAX_ENTRIES`: maximum record count
    /// - `GQLCACHE_EXPIRE_AFTER_ACCESS_MS`: idle expiry in milliseconds
    /// - `GQLCACHE_EXPIRE_AFTER_WRITE_MS`: write expiry in milliseconds
    pub fn from_env() -> Self {
        fn env_u64(name: &str) -> Option<u64> {
            std::env::var(name).ok().and_then(|s| s.parse().ok())
        }

        Self {
            max_size_bytes: env_u64("GQLCACHE_MAX_SIZE_BYTES"),
            max_entries: env_u64("GQLCACHE_MAX_ENTRIES"),
            expire_after_access: env_u64("GQLCACHE_EXPIRE_AFTER_ACCESS_MS").map(Duration::from_millis),
            expire_after_write: env_u64("GQLCACHE_EXPIRE_AFTER_WRITE_MS").map(Duration::from_millis),
        }
    }

    /// Validate the policy.
    ///
    /// Zero bounds are rejected.
    pub fn validate(&self) -> CacheResult<()> {
        if self.max_size_bytes == Some(0) {
            return Err(invalid("max_size_bytes", "0", "max_size_bytes must be greater than 0"));
        }
        if self.max_entries == Some(0) {
            return Err(invalid("max_entries", "0", "max_entries must be greater than 0"));
        }
        if let Some(d) = self.expire_after_access.filter(Duration::is_zero) {
            return Err(invalid(
                "expire_after_access",
                &format!("{:?}", d),
                "expire_after_access must be positive",
            ));
        }
        if let Some(d) = self.expire_after_write.filter(Duration::is_zero) {
            return Err(invalid(
                "expire_after_write",
                &format!("{:?}", d),
                "expire_after_write must be positive",
            ));
        }
        Ok(())
    }
}

/// Configuration for a normalized store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Bounds for the memory layer.
    pub eviction: EvictionPolicy,
    /// Changed-key notifications buffered per subscriber before it lags.
    pub change_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            eviction: EvictionPolicy::unbounded(),
            change_buffer: DEFAULT_CHANGE_BUFFER,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn with_change_buffer(mut self, capacity: usize) -> Self {
        self.change_buffer = capacity;
        self
    }

    /// Eviction bounds from the environment, everything else default.
    pub fn from_env() -> Self {
        Self::default().with_eviction(EvictionPolicy::from_env())
    }

    pub fn validate(&self) -> CacheResult<()> {
        self.eviction.validate()?;
        if self.change_buffer == 0 {
            return Err(invalid(
                "change_buffer",
                "0",
                "change_buffer must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> crate::error::CacheError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
