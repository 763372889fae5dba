//! Network transport boundary.

use async_trait::async_trait;
use gqlcache_core::headers::http;
use gqlcache_core::{CacheHeaders, Operation};
use serde_json::Value;

use crate::error::FetchResult;
use crate::policy::FetchPolicy;

/// One operation as handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkRequest {
    pub operation: Operation,
    /// Transport headers, e.g. `X-APOLLO-CACHE-KEY`.
    pub headers: CacheHeaders,
}

impl NetworkRequest {
    /// Request for `operation` tagged with its cache key and the policy
    /// that issued it.
    pub fn new(operation: Operation, policy: FetchPolicy) -> Self {
        let headers = CacheHeaders::builder()
            .add_header(http::CACHE_KEY, operation.cache_key())
            .add_header(http::FETCH_STRATEGY, policy.as_str())
            .build();
        Self { operation, headers }
    }
}

/// Executes operations against a GraphQL server.
///
/// Implementations return the response's `data` object. HTTP, retries and
/// GraphQL error handling live behind this trait.
#[async_trait]
pub trait NetworkTransport: Send + Sync {
    async fn execute(&self, request: &NetworkRequest) -> FetchResult<Value>;
}
