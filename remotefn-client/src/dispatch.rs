//! Transport dispatcher: one network round-trip per remote invocation.

use crate::hooks::{HandleRemote, HookOutcome, RemoteCall};
use crate::navigation::Navigator;
use remotefn_core::{CacheKey, RemoteError, RemoteFunctionResponse, RemoteId};
use remotefn_transport::{Fetch, RequestInit, PATHNAME_HEADER, SEARCH_HEADER};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Clone)]
pub struct Dispatcher {
    fetch: Arc<dyn Fetch>,
    navigator: Arc<dyn Navigator>,
    hook: Option<Arc<dyn HandleRemote>>,
}

impl Dispatcher {
    pub fn new(fetch: Arc<dyn Fetch>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            fetch,
            navigator,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn HandleRemote>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    /// `init` with the ambient navigation headers added
    pub fn request_context(&self, init: RequestInit) -> RequestInit {
        let location = self.navigator.location();
        init.header(PATHNAME_HEADER, location.pathname)
            .header(SEARCH_HEADER, location.search)
    }

    /// Perform a GET call for one remote invocation
    pub async fn remote_request(
        &self,
        url: &str,
        id: &RemoteId,
        payload: &str,
        key: &CacheKey,
    ) -> Result<Value, RemoteError> {
        self.remote_request_with(url, id, payload, key, RequestInit::get())
            .await
    }

    /// Perform a call with caller-supplied request options.
    ///
    /// The hook, when registered, runs to completion before any network I/O.
    pub async fn remote_request_with(
        &self,
        url: &str,
        id: &RemoteId,
        payload: &str,
        key: &CacheKey,
        init: RequestInit,
    ) -> Result<Value, RemoteError> {
        let mut request_url = url.to_string();
        let mut init = self.request_context(init);

        if let Some(hook) = &self.hook {
            let call = RemoteCall {
                id: id.clone(),
                payload: payload.to_string(),
                key: key.clone(),
                url: request_url.clone(),
                init: init.clone(),
            };

            match hook.handle(call).await? {
                HookOutcome::ShortCircuit(response) => {
                    debug!("handleRemote answered {} without a network call", id);
                    let body = RemoteFunctionResponse::from_slice(&response.body)?;
                    return self.settle(id, body).await;
                }
                HookOutcome::Override { url, init: replaced } => {
                    if let Some(url) = url {
                        debug!("handleRemote rewrote URL for {} to {}", id, url);
                        request_url = url;
                    }
                    if let Some(replaced) = replaced {
                        init = replaced;
                    }
                }
                HookOutcome::NoChange => {}
            }
        }

        let response = self.fetch.fetch(&request_url, &init).await.map_err(|e| {
            warn!("Remote function {} failed to send: {}", id, e);
            RemoteError::from(e)
        })?;

        if !response.ok() {
            warn!(
                "Remote function {} returned HTTP {}: {}",
                id,
                response.status,
                response.text()
            );
            return Err(RemoteError::transport(
                Some(response.status),
                "Failed to execute remote function",
            ));
        }

        trace!("Remote function {} response: {}", id, response.text());
        let body = RemoteFunctionResponse::from_slice(&response.body)?;
        self.settle(id, body).await
    }

    async fn settle(
        &self,
        id: &RemoteId,
        response: RemoteFunctionResponse,
    ) -> Result<Value, RemoteError> {
        match response {
            RemoteFunctionResponse::Success { result } => Ok(result),
            RemoteFunctionResponse::Redirect { location } => {
                debug!("Remote function {} redirected to {}", id, location);
                self.navigator.goto(&location).await;
                Err(RemoteError::redirect(location))
            }
            RemoteFunctionResponse::Error { status, error } => {
                debug!("Remote function {} returned an error response", id);
                Err(RemoteError::http(status, error))
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("has_hook", &self.hook.is_some())
            .finish()
    }
}
