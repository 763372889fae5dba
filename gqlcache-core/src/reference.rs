//! Record identity and linkage primitives.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigError;

/// Prefix of a serialized [`CacheReference`].
pub const REFERENCE_PREFIX: &str = "ApolloCacheReference{";

static REFERENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^ApolloCacheReference\{(.+)\}$").expect("reference pattern is a valid regex")
});

/// Identity computed for one response object.
///
/// `NoKey` means the object is stored inline inside its parent record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum CacheKey {
    #[default]
    NoKey,
    Key(String),
}

impl CacheKey {
    /// Build a real key.
    pub fn from(key: impl Into<String>) -> Self {
        CacheKey::Key(key.into())
    }

    /// Returns true for the `NoKey` sentinel.
    pub fn is_no_key(&self) -> bool {
        matches!(self, CacheKey::NoKey)
    }

    /// The key string, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CacheKey::NoKey => None,
            CacheKey::Key(key) => Some(key),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::NoKey => write!(f, "NO_KEY"),
            CacheKey::Key(key) => write!(f, "{}", key),
        }
    }
}

/// Typed pointer from one record's field to another record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheReference {
    key: String,
}

impl CacheReference {
    /// Create a reference to the record stored under `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Key of the referenced record.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Serialized form, `ApolloCacheReference{<key>}`.
    pub fn serialize(&self) -> String {
        format!("{}{}}}", REFERENCE_PREFIX, self.key)
    }

    /// Returns true if `value` is a well-formed serialized reference.
    pub fn can_deserialize(value: &str) -> bool {
        REFERENCE_PATTERN.is_match(value)
    }

    /// Parse a serialized reference.
    ///
    /// Returns `Ok(None)` for ordinary strings. A string that carries the
    /// reference prefix but does not match the full pattern is rejected
    /// immediately.
    pub fn deserialize(value: &str) -> Result<Option<Self>, ConfigError> {
        if let Some(captures) = REFERENCE_PATTERN.captures(value) {
            return Ok(captures.get(1).map(|m| Self::new(m.as_str())));
        }
        if value.starts_with(REFERENCE_PREFIX) {
            return Err(ConfigError::MalformedReference {
                value: value.to_string(),
            });
        }
        Ok(None)
    }
}

impl fmt::Display for CacheReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.serialize())
    }
}

impl From<&CacheReference> for CacheKey {
    fn from(reference: &CacheReference) -> Self {
        CacheKey::from(reference.key())
    }
}
