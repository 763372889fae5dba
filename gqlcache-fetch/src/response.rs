//! Responses produced by the executor.

use chrono::{DateTime, Utc};
use gqlcache_core::CacheHeaders;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Where a response's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Cache,
    Network,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub data: Value,
    pub source: ResponseSource,
    /// When the data was read from the cache or received from the network.
    pub served_at: DateTime<Utc>,
    pub headers: CacheHeaders,
    /// Fields the data was built from; empty for network responses.
    pub dependent_keys: BTreeSet<String>,
}

impl FetchResponse {
    pub fn is_from_cache(&self) -> bool {
        self.source == ResponseSource::Cache
    }
}
