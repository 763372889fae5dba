//! Fetch policies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use gqlcache_core::ConfigError;

/// How a query blends cache reads with network execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchPolicy {
    /// Cache only; a miss is an error and the network is never used.
    CacheOnly,
    /// Network only; the response is still written to the cache.
    NetworkOnly,
    /// Cache, falling back to the network on any cache failure.
    #[default]
    CacheFirst,
    /// Network, falling back to the cache on network failure.
    NetworkFirst,
    /// Cache result first (if any), then the network result.
    CacheAndNetwork,
}

impl FetchPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchPolicy::CacheOnly => "CACHE_ONLY",
            FetchPolicy::NetworkOnly => "NETWORK_ONLY",
            FetchPolicy::CacheFirst => "CACHE_FIRST",
            FetchPolicy::NetworkFirst => "NETWORK_FIRST",
            FetchPolicy::CacheAndNetwork => "CACHE_AND_NETWORK",
        }
    }

    pub fn reads_cache(&self) -> bool {
        !matches!(self, FetchPolicy::NetworkOnly)
    }

    pub fn uses_network(&self) -> bool {
        !matches!(self, FetchPolicy::CacheOnly)
    }
}

impl fmt::Display for FetchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CACHE_ONLY" => Ok(FetchPolicy::CacheOnly),
            "NETWORK_ONLY" => Ok(FetchPolicy::NetworkOnly),
            "CACHE_FIRST" => Ok(FetchPolicy::CacheFirst),
            "NETWORK_FIRST" => Ok(FetchPolicy::NetworkFirst),
            "CACHE_AND_NETWORK" => Ok(FetchPolicy::CacheAndNetwork),
            _ => Err(ConfigError::InvalidValue {
                field: "fetch_policy".to_string(),
                value: s.to_string(),
                reason: "unknown fetch policy".to_string(),
            }),
        }
    }
}
