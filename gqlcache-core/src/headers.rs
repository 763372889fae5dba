//! Per-call cache options.

use std::collections::BTreeMap;

/// Skip merging the write; the changed-field set is still computed.
pub const DO_NOT_STORE: &str = "do-not-store";

/// Delete the record once it has been served.
pub const EVICT_AFTER_READ: &str = "evict-after-read";

/// Transport-level headers understood by the HTTP response cache.
pub mod http {
    pub const CACHE_KEY: &str = "X-APOLLO-CACHE-KEY";
    pub const FETCH_STRATEGY: &str = "X-APOLLO-CACHE-FETCH-STRATEGY";
    pub const SERVED_DATE: &str = "X-APOLLO-SERVED-DATE";
    pub const EXPIRE_TIMEOUT: &str = "X-APOLLO-EXPIRE-TIMEOUT";
    pub const EXPIRE_AFTER_READ: &str = "X-APOLLO-EXPIRE-AFTER-READ";
}

/// Open set of string headers passed to cache operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheHeaders {
    headers: BTreeMap<String, String>,
}

impl CacheHeaders {
    /// Headers with no options set.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn builder() -> CacheHeadersBuilder {
        CacheHeadersBuilder::default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// True when `name` is present with a truthy value.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .get(name)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn do_not_store(&self) -> bool {
        self.has_header(DO_NOT_STORE)
    }

    pub fn evict_after_read(&self) -> bool {
        self.has_header(EVICT_AFTER_READ)
    }

    /// Copy of these headers with `other` layered on top.
    pub fn overlay(&self, other: &CacheHeaders) -> CacheHeaders {
        let mut headers = self.headers.clone();
        headers.extend(other.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        CacheHeaders { headers }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Builder for [`CacheHeaders`].
#[derive(Debug, Clone, Default)]
pub struct CacheHeadersBuilder {
    headers: BTreeMap<String, String>,
}

impl CacheHeadersBuilder {
    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn do_not_store(self) -> Self {
        self.add_header(DO_NOT_STORE, "true")
    }

    pub fn evict_after_read(self) -> Self {
        self.add_header(EVICT_AFTER_READ, "true")
    }

    pub fn build(self) -> CacheHeaders {
        CacheHeaders {
            headers: self.headers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let headers = CacheHeaders::builder().do_not_store().build();
        assert!(headers.do_not_store());
        assert!(!headers.evict_after_read());
        assert!(!CacheHeaders::none().do_not_store());
    }

    #[test]
    fn test_falsy_value_is_not_set() {
        let headers = CacheHeaders::builder()
            .add_header(EVICT_AFTER_READ, "false")
            .build();
        assert!(!headers.evict_after_read());
        assert_eq!(headers.header(EVICT_AFTER_READ), Some("false"));
    }

    #[test]
    fn test_overlay_prefers_other() {
        let base = CacheHeaders::builder()
            .add_header(http::CACHE_KEY, "a")
            .add_header(http::FETCH_STRATEGY, "CACHE_FIRST")
            .build();
        let call = CacheHeaders::builder().add_header(http::CACHE_KEY, "b").build();
        let merged = base.overlay(&call);
        assert_eq!(merged.header(http::CACHE_KEY), Some("b"));
        assert_eq!(merged.header(http::FETCH_STRATEGY), Some("CACHE_FIRST"));
    }
}
