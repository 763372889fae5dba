//! Query execution under a fetch policy.
//!
//! [`QueryExecutor`] sits in front of a [`NormalizedStore`] and a
//! [`NetworkTransport`]. Every execution is a stream of responses: most
//! policies yield exactly one item, `CacheAndNetwork` may yield a cached
//! response before the network one, and watchers keep yielding as the
//! cache changes.
//!
//! Store calls are synchronous and may hit disk, so they run on the
//! blocking pool.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_stream::stream;
use chrono::Utc;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use gqlcache_core::headers::http;
use gqlcache_core::{new_mutation_id, CacheHeaders, ChangedKeys, Operation};
use gqlcache_storage::NormalizedStore;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{FetchError, FetchResult};
use crate::policy::FetchPolicy;
use crate::response::{FetchResponse, ResponseSource};
use crate::transport::{NetworkRequest, NetworkTransport};

/// Stream of responses for one execution.
pub type FetchStream = BoxStream<'static, FetchResult<FetchResponse>>;

#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<NormalizedStore>,
    transport: Arc<dyn NetworkTransport>,
}

impl QueryExecutor {
    pub fn new(store: Arc<NormalizedStore>, transport: Arc<dyn NetworkTransport>) -> Self {
        Self { store, transport }
    }

    pub fn store(&self) -> &Arc<NormalizedStore> {
        &self.store
    }

    /// Execute `operation` under `policy`.
    ///
    /// Cache misses and incompatible shapes never reach the caller except
    /// under `CacheOnly`; other policies fall back to the network.
    pub fn execute(&self, operation: Operation, policy: FetchPolicy) -> FetchStream {
        let store = self.store.clone();
        let transport = self.transport.clone();

        Box::pin(stream! {
            match policy {
                FetchPolicy::CacheOnly => {
                    yield read_cache(&store, &operation).await;
                }
                FetchPolicy::NetworkOnly => {
                    yield fetch_network(&store, transport.as_ref(), &operation, policy).await;
                }
                FetchPolicy::CacheFirst => match read_cache(&store, &operation).await {
                    Ok(response) => yield Ok(response),
                    Err(e) => {
                        log_cache_fallback(&operation, &e);
                        yield fetch_network(&store, transport.as_ref(), &operation, policy).await;
                    }
                },
                FetchPolicy::NetworkFirst => {
                    match fetch_network(&store, transport.as_ref(), &operation, policy).await {
                        Ok(response) => yield Ok(response),
                        Err(network_err) => match read_cache(&store, &operation).await {
                            Ok(response) => yield Ok(response),
                            Err(cache_err) => {
                                tracing::debug!(
                                    operation = %operation.name,
                                    error = %cache_err,
                                    "Cache fallback failed, reporting network error"
                                );
                                yield Err(network_err);
                            }
                        },
                    }
                }
                FetchPolicy::CacheAndNetwork => {
                    match read_cache(&store, &operation).await {
                        Ok(response) => yield Ok(response),
                        Err(e) => log_cache_fallback(&operation, &e),
                    }
                    yield fetch_network(&store, transport.as_ref(), &operation, policy).await;
                }
            }
        })
    }

    /// First response of [`execute`](Self::execute).
    pub async fn fetch(&self, operation: Operation, policy: FetchPolicy) -> FetchResult<FetchResponse> {
        match self.execute(operation, policy).next().await {
            Some(result) => result,
            None => Err(FetchError::network("execution produced no response")),
        }
    }

    /// Execute under `policy`, then re-read from the cache whenever a
    /// write touches a field the last result was built from.
    ///
    /// Consecutive identical results are yielded once. The stream runs
    /// until it is dropped.
    pub fn watch(&self, operation: Operation, policy: FetchPolicy) -> FetchStream {
        let store = self.store.clone();
        // Subscribe before the first execution so no write is missed.
        let mut rx = store.subscribe();
        let initial = self.execute(operation.clone(), policy);

        Box::pin(stream! {
            let mut last: Option<Value> = None;
            let mut dependent_keys: BTreeSet<String> = BTreeSet::new();

            let mut initial = initial;
            while let Some(result) = initial.next().await {
                if let Ok(response) = &result {
                    last = Some(response.data.clone());
                    dependent_keys = response.dependent_keys.clone();
                }
                yield result;
            }

            // Network responses carry no dependencies; learn them from the
            // records the response was just written to.
            if dependent_keys.is_empty() {
                if let Ok(response) = read_cache(&store, &operation).await {
                    dependent_keys = response.dependent_keys;
                }
            }

            loop {
                let changed: Option<ChangedKeys> = match rx.recv().await {
                    Ok(changed) => Some(changed),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, operation = %operation.name, "Watcher lagged, re-reading");
                        None
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if let Some(changed) = &changed {
                    if dependent_keys.is_disjoint(changed) {
                        continue;
                    }
                }

                match read_cache(&store, &operation).await {
                    Ok(response) => {
                        dependent_keys = response.dependent_keys.clone();
                        if last.as_ref() == Some(&response.data) {
                            continue;
                        }
                        last = Some(response.data.clone());
                        yield Ok(response);
                    }
                    Err(e) => {
                        tracing::debug!(operation = %operation.name, error = %e, "Watched data no longer readable");
                    }
                }
            }
        })
    }

    /// Execute a mutation, showing `optimistic` data until the server
    /// responds.
    ///
    /// The optimistic layer is rolled back whether or not the network call
    /// succeeds; on success the server's data is then written durably.
    pub async fn execute_mutation(
        &self,
        operation: Operation,
        optimistic: Option<Value>,
    ) -> FetchResult<FetchResponse> {
        let mutation_id = new_mutation_id();

        if let Some(data) = optimistic {
            let store = self.store.clone();
            let op = operation.clone();
            let changed = tokio::task::spawn_blocking(move || {
                store.write_optimistic_updates(&op, &data, mutation_id)
            })
            .await??;
            tracing::debug!(
                operation = %operation.name,
                mutation_id = %mutation_id,
                changed = changed.len(),
                "Applied optimistic response"
            );
        }

        let request = NetworkRequest::new(operation.clone(), FetchPolicy::NetworkOnly);
        let network = self.transport.execute(&request).await;

        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.rollback_optimistic_updates(mutation_id)).await??;

        let data = network?;
        write_response(&self.store, &operation, &data).await;
        Ok(network_response(request, data))
    }
}

fn log_cache_fallback(operation: &Operation, error: &FetchError) {
    if error.is_cache_miss() {
        tracing::debug!(operation = %operation.name, error = %error, "Cache miss");
    } else {
        tracing::warn!(operation = %operation.name, error = %error, "Cache read failed");
    }
}

async fn read_cache(store: &Arc<NormalizedStore>, operation: &Operation) -> FetchResult<FetchResponse> {
    let store = store.clone();
    let op = operation.clone();
    let read = tokio::task::spawn_blocking(move || store.read_operation(&op, &CacheHeaders::none())).await??;
    Ok(FetchResponse {
        data: read.data,
        source: ResponseSource::Cache,
        served_at: Utc::now(),
        headers: CacheHeaders::none(),
        dependent_keys: read.dependent_keys,
    })
}

async fn fetch_network(
    store: &Arc<NormalizedStore>,
    transport: &dyn NetworkTransport,
    operation: &Operation,
    policy: FetchPolicy,
) -> FetchResult<FetchResponse> {
    let request = NetworkRequest::new(operation.clone(), policy);
    let data = transport.execute(&request).await?;
    write_response(store, operation, &data).await;
    Ok(network_response(request, data))
}

/// Store network data. A failed write is logged and does not fail the
/// response, which is already valid without the cache.
async fn write_response(store: &Arc<NormalizedStore>, operation: &Operation, data: &Value) {
    let store = store.clone();
    let op = operation.clone();
    let data = data.clone();
    let written = tokio::task::spawn_blocking(move || store.write_operation(&op, &data, &CacheHeaders::none())).await;
    match written {
        Ok(Ok(changed)) => {
            tracing::debug!(operation = %operation.name, changed = changed.len(), "Cached network response");
        }
        Ok(Err(e)) => {
            tracing::warn!(operation = %operation.name, error = %e, "Failed to cache network response");
        }
        Err(e) => {
            tracing::warn!(operation = %operation.name, error = %e, "Cache write task failed");
        }
    }
}

fn network_response(request: NetworkRequest, data: Value) -> FetchResponse {
    let served_at = Utc::now();
    let served = CacheHeaders::builder()
        .add_header(http::SERVED_DATE, served_at.to_rfc3339())
        .build();
    FetchResponse {
        data,
        source: ResponseSource::Network,
        served_at,
        headers: request.headers.overlay(&served),
        dependent_keys: BTreeSet::new(),
    }
}
