//! Shared asynchronous result of one remote call.

use futures::future::BoxFuture;
use remotefn_core::{CacheKey, RemoteError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::debug;

pub type LoadFuture = BoxFuture<'static, Result<Value, RemoteError>>;

/// Produces a fresh load of the resource, once initially and again on `refresh`
pub type Loader = Arc<dyn Fn() -> LoadFuture + Send + Sync>;

type OverrideFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceState {
    Loading,
    Ready(Value),
    Failed(RemoteError),
}

/// Handle to a cached remote result.
///
/// Clones share the same underlying state; identity is compared with
/// [`Resource::same`].
#[derive(Clone)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

struct ResourceInner {
    key: CacheKey,
    state: watch::Sender<ResourceState>,
    overrides: Mutex<Vec<(u64, OverrideFn)>>,
    next_override: AtomicU64,
    loader: Loader,
}

impl Resource {
    /// A resource that still has to be loaded
    pub fn new(key: CacheKey, loader: Loader) -> Self {
        Self::with_state(key, ResourceState::Loading, loader)
    }

    /// A resource whose value is already known, e.g. from server-rendered data
    pub fn ready(key: CacheKey, value: Value, loader: Loader) -> Self {
        Self::with_state(key, ResourceState::Ready(value), loader)
    }

    fn with_state(key: CacheKey, state: ResourceState, loader: Loader) -> Self {
        let (state, _) = watch::channel(state);
        Self {
            inner: Arc::new(ResourceInner {
                key,
                state,
                overrides: Mutex::new(Vec::new()),
                next_override: AtomicU64::new(1),
                loader,
            }),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.inner.key
    }

    pub fn same(a: &Resource, b: &Resource) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Snapshot of the underlying state, without overrides
    pub fn state(&self) -> ResourceState {
        self.inner.state.borrow().clone()
    }

    pub fn is_loading(&self) -> bool {
        matches!(*self.inner.state.borrow(), ResourceState::Loading)
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.inner.state.borrow(), ResourceState::Failed(_))
    }

    /// Wait for the resource to settle. Active overrides are applied to the value.
    pub async fn value(&self) -> Result<Value, RemoteError> {
        let mut rx = self.inner.state.subscribe();
        let settled = rx
            .wait_for(|state| !matches!(state, ResourceState::Loading))
            .await
            .map(|state| (*state).clone())
            .map_err(|_| RemoteError::transport(None, "Resource was dropped while loading"))?;

        match settled {
            ResourceState::Failed(err) => Err(err),
            ResourceState::Ready(value) => Ok(self.apply_overrides(value)),
            ResourceState::Loading => {
                Err(RemoteError::transport(None, "Resource is still loading"))
            }
        }
    }

    pub async fn value_as<T: DeserializeOwned>(&self) -> Result<T, RemoteError> {
        let value = self.value().await?;
        serde_json::from_value(value).map_err(|e| RemoteError::decode(e.to_string()))
    }

    /// Current value with overrides applied, if it has resolved
    pub fn current(&self) -> Option<Value> {
        match self.state() {
            ResourceState::Ready(value) => Some(self.apply_overrides(value)),
            _ => None,
        }
    }

    /// Replace the resolved value in place; every observer sees the new value
    pub fn set(&self, value: Value) {
        debug!("Setting resource {}", self.inner.key);
        self.inner.state.send_replace(ResourceState::Ready(value));
    }

    /// Observe state changes, including override application and release
    pub fn subscribe(&self) -> watch::Receiver<ResourceState> {
        self.inner.state.subscribe()
    }

    /// Re-run the loader and `set` the result on success.
    ///
    /// A failed refresh leaves the previous value untouched.
    pub async fn refresh(&self) -> Result<Value, RemoteError> {
        let value = (self.inner.loader)().await?;
        self.set(value.clone());
        Ok(value)
    }

    /// Apply an optimistic update on top of the resolved value until released
    pub fn with_override<F>(&self, update: F) -> Override
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        let id = self.inner.next_override.fetch_add(1, Ordering::Relaxed);
        self.overrides().push((id, Arc::new(update)));
        self.notify();
        debug!("Applied override {} to {}", id, self.inner.key);

        Override {
            resource: self.clone(),
            id,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn override_count(&self) -> usize {
        self.overrides().len()
    }

    pub(crate) fn load(&self) -> LoadFuture {
        (self.inner.loader)()
    }

    /// Record the outcome of the initial load.
    ///
    /// A value pushed with `set` while loading wins over the loaded one; in
    /// that case the resource counts as successfully settled.
    pub(crate) fn complete(&self, outcome: Result<Value, RemoteError>) -> Result<(), RemoteError> {
        let mut result = Ok(());
        self.inner.state.send_if_modified(|state| {
            if !matches!(state, ResourceState::Loading) {
                return false;
            }
            *state = match outcome {
                Ok(value) => ResourceState::Ready(value),
                Err(err) => {
                    result = Err(err.clone());
                    ResourceState::Failed(err)
                }
            };
            true
        });
        result
    }

    fn release_override(&self, id: u64) {
        self.overrides().retain(|(existing, _)| *existing != id);
        self.notify();
        debug!("Released override {} on {}", id, self.inner.key);
    }

    fn apply_overrides(&self, value: Value) -> Value {
        let overrides: Vec<OverrideFn> = self.overrides().iter().map(|(_, f)| f.clone()).collect();
        overrides.iter().fold(value, |value, update| update(value))
    }

    fn overrides(&self) -> std::sync::MutexGuard<'_, Vec<(u64, OverrideFn)>> {
        self.inner
            .overrides
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.inner.state.send_modify(|_| {});
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("key", &self.inner.key)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

/// A pending optimistic update against one resource.
///
/// Clones refer to the same override. Releasing is idempotent: only the first
/// call has an effect and returns `true`.
#[derive(Clone)]
pub struct Override {
    resource: Resource,
    id: u64,
    released: Arc<AtomicBool>,
}

impl Override {
    /// Key of the resource this override applies to
    pub fn key(&self) -> &CacheKey {
        self.resource.key()
    }

    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.resource.release_override(self.id);
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Override")
            .field("key", self.key())
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}
