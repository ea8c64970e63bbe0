use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a server-defined remote function
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

/// Canonical identity of one remote call: function id plus encoded argument
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl RemoteId {
    pub fn new(value: impl Into<String>) -> Self {
        RemoteId(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl CacheKey {
    /// Wraps an already-derived key, e.g. one read back from a refresh payload
    pub fn new(value: impl Into<String>) -> Self {
        CacheKey(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(value: &str) -> Self {
        RemoteId::new(value)
    }
}

impl From<String> for RemoteId {
    fn from(value: String) -> Self {
        RemoteId(value)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        CacheKey::new(value)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        CacheKey(value)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
