//! gqlcache Fetch - Cache and Network Policies
//!
//! Runs operations against a [`NormalizedStore`](gqlcache_storage::NormalizedStore)
//! and a [`NetworkTransport`] under one of the [`FetchPolicy`] strategies.
//! Responses are delivered as streams so that `CacheAndNetwork` and
//! watchers can emit more than once.

pub mod error;
pub mod executor;
pub mod policy;
pub mod response;
pub mod transport;

pub use error::{FetchError, FetchResult};
pub use executor::{FetchStream, QueryExecutor};
pub use policy::FetchPolicy;
pub use response::{FetchResponse, ResponseSource};
pub use transport::{NetworkRequest, NetworkTransport};
