//! The application hook that may intercept every remote call.

use async_trait::async_trait;
use remotefn_core::{CacheKey, RemoteError, RemoteId};
use remotefn_transport::{FetchResponse, RequestInit};
use std::future::Future;

/// What the hook sees of a call about to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub id: RemoteId,
    pub payload: String,
    pub key: CacheKey,
    pub url: String,
    pub init: RequestInit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Send the request as prepared
    NoChange,
    /// Send the request with a replaced URL and/or init
    Override {
        url: Option<String>,
        init: Option<RequestInit>,
    },
    /// Skip the network and treat this as the response
    ShortCircuit(FetchResponse),
}

/// Intercepts remote calls before any network I/O.
///
/// Errors returned by the hook fail the call as-is.
#[async_trait]
pub trait HandleRemote: Send + Sync {
    async fn handle(&self, call: RemoteCall) -> Result<HookOutcome, RemoteError>;
}

#[async_trait]
impl<F, Fut> HandleRemote for F
where
    F: Fn(RemoteCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HookOutcome, RemoteError>> + Send + 'static,
{
    async fn handle(&self, call: RemoteCall) -> Result<HookOutcome, RemoteError> {
        (self)(call).await
    }
}
