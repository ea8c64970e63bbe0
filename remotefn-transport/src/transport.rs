use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use indexmap::IndexMap;
use remotefn_core::RemoteError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Header carrying the pathname of the page issuing the call
pub const PATHNAME_HEADER: &str = "x-request-pathname";
/// Header carrying the query string of the page issuing the call
pub const SEARCH_HEADER: &str = "x-request-search";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Timed out after {0}ms")]
    Timeout(u64),
    #[error("Failed to read response body: {0}")]
    Body(String),
}

impl From<TransportError> for RemoteError {
    fn from(err: TransportError) -> Self {
        RemoteError::transport(None, err.to_string())
    }
}

/// Outgoing request options, the `init` half of a fetch call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInit {
    pub method: Method,
    pub headers: IndexMap<String, String>,
    pub body: Option<String>,
}

impl Default for RequestInit {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: IndexMap::new(),
            body: None,
        }
    }
}

impl RequestInit {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post_json<T: Serialize + ?Sized>(body: &T) -> Result<Self, TransportError> {
        let body = serde_json::to_string(body)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            method: Method::POST,
            headers: IndexMap::new(),
            body: Some(body),
        }
        .header("content-type", "application/json"))
    }

    /// Set a header, replacing any existing value (names are lowercased)
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// A response as seen by the caller of [`Fetch`].
///
/// Also used for synthetic responses produced without any network I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// A 200 response with `value` serialized as its JSON body
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, TransportError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self::new(200, body))
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The network primitive remote calls go through
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str, init: &RequestInit) -> Result<FetchResponse, TransportError>;
}
