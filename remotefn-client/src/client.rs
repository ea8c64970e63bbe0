// Remote function client
// Ties the pieces together for application code:
// - query and prerender functions served from the shared resource cache
// - commands that reconcile optimistic overrides with server refreshes
// - one cache, codec, hook and navigator per client instance

use crate::cache::ResourceCache;
use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::hooks::HandleRemote;
use crate::lifecycle::{ConsumerScope, FlushScheduler, TokioTick};
use crate::navigation::{MemoryNavigator, Navigator};
use crate::refresh::{apply_refresh, release_overrides, Update};
use crate::resource::{Loader, Resource};
use futures::FutureExt;
use remotefn_core::{
    encode, CacheKey, Codec, CommandResult, EncodedCall, RemoteError, RemoteId,
};
use remotefn_transport::{Fetch, RequestInit};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

struct ClientInner {
    config: ClientConfig,
    codec: Codec,
    dispatcher: Dispatcher,
    cache: ResourceCache,
}

/// Entry point for calling remote functions. Cheap to clone.
#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<ClientInner>,
}

impl RemoteClient {
    pub fn builder(config: ClientConfig) -> RemoteClientBuilder {
        RemoteClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn codec(&self) -> &Codec {
        &self.inner.codec
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.inner.cache
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn query(&self, id: impl Into<RemoteId>) -> QueryFunction {
        QueryFunction {
            client: self.clone(),
            id: id.into(),
        }
    }

    pub fn prerender(&self, id: impl Into<RemoteId>) -> PrerenderFunction {
        PrerenderFunction {
            client: self.clone(),
            id: id.into(),
        }
    }

    pub fn command(&self, id: impl Into<RemoteId>) -> CommandFunction {
        CommandFunction {
            client: self.clone(),
            id: id.into(),
        }
    }

    /// Apply an encoded refresh payload against this client's cache
    pub fn apply_refresh(&self, encoded: &str, updates: &[Update]) -> Result<(), RemoteError> {
        apply_refresh(&self.inner.cache, &self.inner.codec, encoded, updates)
    }

    // Shared path for cached functions: look the key up, or create a resource
    // whose loader issues a GET to `url`. Hits build nothing.
    fn cached(
        &self,
        id: &RemoteId,
        call: EncodedCall,
        url: String,
        scope: &dyn ConsumerScope,
    ) -> Result<Resource, RemoteError> {
        let EncodedCall { payload, key } = call;
        let cache = &self.inner.cache;

        cache.acquire(&key, &payload, scope, |key, payload| {
            let loader = self.loader(id.clone(), key.clone(), payload.to_string(), url);
            match cache.cached_response(key) {
                Some(value) => {
                    debug!("Using server-rendered result for {}", key);
                    Resource::ready(key.clone(), value, loader)
                }
                None => Resource::new(key.clone(), loader),
            }
        })
    }

    // Loaders hold the client weakly: the cache owns resources, resources own
    // loaders, and the client owns the cache.
    fn loader(&self, id: RemoteId, key: CacheKey, payload: String, url: String) -> Loader {
        let client = Arc::downgrade(&self.inner);
        Arc::new(move || {
            let client: Weak<ClientInner> = client.clone();
            let (id, key, payload, url) = (id.clone(), key.clone(), payload.clone(), url.clone());
            async move {
                let inner = client
                    .upgrade()
                    .ok_or_else(|| RemoteError::transport(None, "Client was dropped"))?;
                let result = inner
                    .dispatcher
                    .remote_request(&url, &id, &payload, &key)
                    .await?;
                decode_result(&inner.codec, result)
            }
            .boxed()
        })
    }
}

impl fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClient")
            .field("config", &self.inner.config)
            .field("cache", &self.inner.cache)
            .finish()
    }
}

/// Results travel as codec text; anything else is plain JSON and passes through
fn decode_result(codec: &Codec, result: Value) -> Result<Value, RemoteError> {
    match result {
        Value::String(text) => match codec.parse(&text) {
            Ok(value) => Ok(value),
            Err(err) => {
                trace!("Result is not codec text ({}), using it verbatim", err);
                Ok(Value::String(text))
            }
        },
        other => Ok(other),
    }
}

pub struct RemoteClientBuilder {
    config: ClientConfig,
    codec: Codec,
    fetch: Option<Arc<dyn Fetch>>,
    navigator: Option<Arc<dyn Navigator>>,
    hook: Option<Arc<dyn HandleRemote>>,
    scheduler: Option<Arc<dyn FlushScheduler>>,
}

impl RemoteClientBuilder {
    fn new(config: ClientConfig) -> Self {
        Self {
            config,
            codec: Codec::new(),
            fetch: None,
            navigator: None,
            hook: None,
            scheduler: None,
        }
    }

    /// Custom type hooks used for arguments, results and refreshes
    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn fetch(mut self, fetch: Arc<dyn Fetch>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn handle_remote(mut self, hook: Arc<dyn HandleRemote>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn FlushScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Result<RemoteClient, RemoteError> {
        let fetch = match self.fetch {
            Some(fetch) => fetch,
            None => default_fetch(&self.config)?,
        };
        let navigator = self
            .navigator
            .unwrap_or_else(|| Arc::new(MemoryNavigator::default()));
        let scheduler: Arc<dyn FlushScheduler> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(
                TokioTick::current().map_err(|e| RemoteError::transport(None, e.to_string()))?,
            ),
        };

        let mut dispatcher = Dispatcher::new(fetch, navigator);
        if let Some(hook) = self.hook {
            dispatcher = dispatcher.with_hook(hook);
        }

        Ok(RemoteClient {
            inner: Arc::new(ClientInner {
                config: self.config,
                codec: self.codec,
                dispatcher,
                cache: ResourceCache::new(scheduler),
            }),
        })
    }
}

impl fmt::Debug for RemoteClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClientBuilder")
            .field("config", &self.config)
            .field("has_fetch", &self.fetch.is_some())
            .field("has_hook", &self.hook.is_some())
            .finish()
    }
}

#[cfg(feature = "reqwest-fetch")]
fn default_fetch(config: &ClientConfig) -> Result<Arc<dyn Fetch>, RemoteError> {
    Ok(Arc::new(remotefn_transport::ReqwestFetch::new(config.timeout_ms)?))
}

#[cfg(not(feature = "reqwest-fetch"))]
fn default_fetch(_config: &ClientConfig) -> Result<Arc<dyn Fetch>, RemoteError> {
    Err(RemoteError::transport(None, "No fetch implementation configured"))
}

/// A cached, read-only remote function
#[derive(Debug, Clone)]
pub struct QueryFunction {
    client: RemoteClient,
    id: RemoteId,
}

impl QueryFunction {
    pub fn id(&self) -> &RemoteId {
        &self.id
    }

    /// Get the resource for `arg`, fetching it if nothing is cached.
    ///
    /// Fails if `arg` cannot be encoded, or on a miss outside a Tokio runtime.
    /// Network outcomes are reported through the resource.
    pub fn call<T: Serialize + ?Sized>(
        &self,
        arg: &T,
        scope: &dyn ConsumerScope,
    ) -> Result<Resource, RemoteError> {
        let call = encode(&self.id, arg, self.client.codec())?;
        let endpoint = self.client.config().endpoint(&self.id);
        let url = if call.payload.is_empty() {
            endpoint
        } else {
            format!("{}?payload={}", endpoint, call.payload)
        };
        self.client.cached(&self.id, call, url, scope)
    }
}

/// A cached remote function whose results were rendered at build time
#[derive(Debug, Clone)]
pub struct PrerenderFunction {
    client: RemoteClient,
    id: RemoteId,
}

impl PrerenderFunction {
    pub fn id(&self) -> &RemoteId {
        &self.id
    }

    pub fn call<T: Serialize + ?Sized>(
        &self,
        arg: &T,
        scope: &dyn ConsumerScope,
    ) -> Result<Resource, RemoteError> {
        let call = encode(&self.id, arg, self.client.codec())?;
        let endpoint = self.client.config().endpoint(&self.id);
        let url = if call.payload.is_empty() {
            endpoint
        } else {
            format!("{}/{}", endpoint, call.payload)
        };
        self.client.cached(&self.id, call, url, scope)
    }
}

/// A mutating remote function; never cached
#[derive(Debug, Clone)]
pub struct CommandFunction {
    client: RemoteClient,
    id: RemoteId,
}

impl CommandFunction {
    pub fn id(&self) -> &RemoteId {
        &self.id
    }

    /// Run the command and reconcile `updates` with the server's refreshes.
    ///
    /// Overrides in `updates` are released on every path: by the refresh
    /// payload when the server sends one, unconditionally otherwise, and
    /// before the error is returned on failure.
    pub async fn call<T: Serialize + ?Sized>(
        &self,
        arg: &T,
        updates: &[Update],
    ) -> Result<Value, RemoteError> {
        let outcome = self.run(arg, updates).await;
        if outcome.is_err() {
            release_overrides(updates);
        }
        outcome
    }

    async fn run<T: Serialize + ?Sized>(
        &self,
        arg: &T,
        updates: &[Update],
    ) -> Result<Value, RemoteError> {
        let client = &self.client;
        let EncodedCall { payload, key } = encode(&self.id, arg, client.codec())?;
        let refreshes: Vec<&str> = updates.iter().map(|u| u.key().as_str()).collect();
        let init = RequestInit::post_json(&json!({
            "payload": payload,
            "refreshes": refreshes,
        }))?;

        let url = client.config().endpoint(&self.id);
        let result = client
            .dispatcher()
            .remote_request_with(&url, &self.id, &payload, &key, init)
            .await?;
        let CommandResult { result, refreshes } = serde_json::from_value(result)
            .map_err(|e| RemoteError::decode(format!("Invalid command result: {}", e)))?;

        match refreshes {
            Some(encoded) => client.apply_refresh(&encoded, updates)?,
            None => release_overrides(updates),
        }
        decode_result(client.codec(), result)
    }
}
