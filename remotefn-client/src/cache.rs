//! Reference-counted cache of remote resources.
//!
//! Entries are created on the first miss for a key and shared by every later
//! call with the same key. Each tracked consumer holds one reference; when a
//! consumer detaches, the entry is dropped after the next flush if nobody
//! re-attached in the meantime. Failed resources are dropped as soon as they
//! settle, whatever their reference count.

use crate::lifecycle::{ConsumerScope, FlushScheduler, Task};
use crate::resource::Resource;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use remotefn_core::{CacheKey, RemoteError};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, warn};

struct CacheEntry {
    resource: Resource,
    count: AtomicUsize,
}

impl CacheEntry {
    fn retain(&self) -> usize {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn release(&self) -> usize {
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            })
            .unwrap_or_default();
        previous.saturating_sub(1)
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

struct CacheInner {
    entries: DashMap<CacheKey, Arc<CacheEntry>>,
    /// Server-rendered results, consumed by factories instead of a network call
    responses: DashMap<CacheKey, Value>,
    scheduler: Arc<dyn FlushScheduler>,
}

impl CacheInner {
    fn detach(self: &Arc<Self>, key: CacheKey) {
        let Some(entry) = self.entries.get(&key).map(|e| Arc::clone(e.value())) else {
            return;
        };
        let remaining = entry.release();
        debug!("Consumer detached from {}, count = {}", key, remaining);

        let weak = Arc::downgrade(self);
        self.scheduler.after_flush(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.evict_if_idle(&key, &entry, true);
            }
        }));
    }

    /// Remove `entry` if it is still the one stored under `key` and nobody holds it
    fn evict_if_idle(&self, key: &CacheKey, entry: &Arc<CacheEntry>, clear_response: bool) {
        let removed = self
            .entries
            .remove_if(key, |_, current| {
                Arc::ptr_eq(current, entry) && entry.count() == 0
            })
            .is_some();

        if removed {
            debug!("Evicted idle resource {}", key);
            if clear_response {
                self.responses.remove(key);
            }
        }
    }

    fn evict_failed(&self, key: &CacheKey, entry: &Arc<CacheEntry>) {
        if self
            .entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, entry))
            .is_some()
        {
            debug!("Evicted failed resource {}", key);
        }
    }
}

/// The key -> resource mapping for one application or session.
///
/// Cloning yields another handle to the same cache.
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<CacheInner>,
}

impl ResourceCache {
    pub fn new(scheduler: Arc<dyn FlushScheduler>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: DashMap::new(),
                responses: DashMap::new(),
                scheduler,
            }),
        }
    }

    /// Return the resource cached under `key`, or create it with `factory`.
    ///
    /// The calling consumer is registered with `scope`; when the scope cannot
    /// track consumers the call still succeeds but holds no reference. The
    /// miss check and the insert happen under one shard lock, so two calls for
    /// the same key never both invoke `factory`. `factory` may read seeded
    /// responses but must not touch the entries of this cache.
    ///
    /// A new resource loads on the current Tokio runtime. Without one, a miss
    /// fails with a transport error and leaves the cache unchanged; hits still
    /// succeed.
    pub fn acquire<F>(
        &self,
        key: &CacheKey,
        payload: &str,
        scope: &dyn ConsumerScope,
        factory: F,
    ) -> Result<Resource, RemoteError>
    where
        F: FnOnce(&CacheKey, &str) -> Resource,
    {
        let runtime = Handle::try_current().ok();
        let armed = Arc::new(AtomicBool::new(false));
        let tracking = scope
            .on_teardown(self.teardown_for(key.clone(), Arc::clone(&armed)))
            .is_ok();
        if !tracking {
            debug!("Lifecycle tracking unavailable for {}", key);
        }

        let (resource, created) = match self.inner.entries.entry(key.clone()) {
            Entry::Occupied(occupied) if !occupied.get().resource.is_failed() => {
                let entry = occupied.get();
                if tracking {
                    let count = entry.retain();
                    debug!("Cache hit for {}, count = {}", key, count);
                } else {
                    debug!("Cache hit for {}", key);
                }
                (entry.resource.clone(), None)
            }
            slot => {
                let Some(runtime) = runtime else {
                    warn!("Cannot load {} outside a Tokio runtime", key);
                    return Err(RemoteError::transport(
                        None,
                        "No Tokio runtime to load the resource on",
                    ));
                };
                debug!("Cache miss for {}", key);
                let resource = factory(key, payload);
                let entry = Arc::new(CacheEntry {
                    resource: resource.clone(),
                    count: AtomicUsize::new(usize::from(tracking)),
                });
                slot.insert(Arc::clone(&entry));
                (resource, Some((runtime, entry)))
            }
        };

        armed.store(true, Ordering::Release);
        if let Some((runtime, entry)) = created {
            self.settle(&runtime, key.clone(), entry);
        }
        Ok(resource)
    }

    /// Hold a reference to an existing entry until the returned guard detaches
    pub fn register_consumer(&self, key: &CacheKey) -> Option<ConsumerGuard> {
        let entry = self.inner.entries.get(key)?;
        let count = entry.retain();
        debug!("Consumer registered on {}, count = {}", key, count);
        Some(ConsumerGuard {
            cache: Arc::downgrade(&self.inner),
            key: Some(key.clone()),
        })
    }

    pub fn get(&self, key: &CacheKey) -> Option<Resource> {
        self.inner
            .entries
            .get(key)
            .map(|entry| entry.resource.clone())
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.entries.contains_key(key)
    }

    /// Reference count of the entry under `key`
    pub fn count(&self, key: &CacheKey) -> Option<usize> {
        self.inner.entries.get(key).map(|entry| entry.count())
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Store a server-rendered result for `key`
    pub fn seed_response(&self, key: CacheKey, value: Value) {
        self.inner.responses.insert(key, value);
    }

    pub fn cached_response(&self, key: &CacheKey) -> Option<Value> {
        self.inner
            .responses
            .get(key)
            .map(|value| value.value().clone())
    }

    /// Drop every entry and seeded response
    pub fn clear(&self) {
        self.inner.entries.clear();
        self.inner.responses.clear();
        debug!("Resource cache cleared");
    }

    // Does nothing unless `armed`: an acquire that failed holds no reference.
    fn teardown_for(&self, key: CacheKey, armed: Arc<AtomicBool>) -> Task {
        let weak = Arc::downgrade(&self.inner);
        Box::new(move || {
            if !armed.load(Ordering::Acquire) {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                inner.detach(key);
            }
        })
    }

    // Observes the first settlement of a freshly created entry.
    fn settle(&self, runtime: &Handle, key: CacheKey, entry: Arc<CacheEntry>) {
        let weak = Arc::downgrade(&self.inner);
        let load = entry
            .resource
            .is_loading()
            .then(|| entry.resource.load());

        runtime.spawn(async move {
            let outcome = match load {
                Some(load) => entry.resource.complete(load.await),
                None => Ok(()),
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };

            match outcome {
                Ok(()) => {
                    let weak = Arc::downgrade(&inner);
                    inner.scheduler.after_flush(Box::new(move || {
                        if let Some(inner) = weak.upgrade() {
                            inner.evict_if_idle(&key, &entry, false);
                        }
                    }));
                }
                Err(err) => {
                    if err.is_redirect() {
                        debug!("Resource {} redirected: {}", key, err);
                    } else {
                        warn!("Resource {} failed: {}", key, err);
                    }
                    inner.evict_failed(&key, &entry);
                }
            }
        });
    }
}

impl fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("entries", &self.inner.entries.len())
            .field("responses", &self.inner.responses.len())
            .finish()
    }
}

/// A manually held reference on a cache entry; detaches on drop
pub struct ConsumerGuard {
    cache: Weak<CacheInner>,
    key: Option<CacheKey>,
}

impl ConsumerGuard {
    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let (Some(key), Some(inner)) = (self.key.take(), self.cache.upgrade()) {
            inner.detach(key);
        }
    }
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ConsumerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerGuard").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{ManualFlush, Scope, Untracked};
    use crate::resource::Loader;
    use futures::FutureExt;
    use serde_json::json;

    fn ok_loader(value: Value) -> Loader {
        Arc::new(move || {
            let value = value.clone();
            async move { Ok::<_, RemoteError>(value) }.boxed()
        })
    }

    fn cache() -> (ResourceCache, Arc<ManualFlush>) {
        let flush = Arc::new(ManualFlush::new());
        (ResourceCache::new(flush.clone()), flush)
    }

    #[tokio::test]
    async fn test_hit_reuses_resource() {
        let (cache, _flush) = cache();
        let key = CacheKey::from("getUser/abc");
        let calls = AtomicUsize::new(0);
        let scope = Scope::new();

        let mut make = |key: &CacheKey, _: &str| {
            calls.fetch_add(1, Ordering::SeqCst);
            Resource::new(key.clone(), ok_loader(json!(1)))
        };
        let first = cache.acquire(&key, "abc", &scope, &mut make).unwrap();
        let second = cache.acquire(&key, "abc", &scope, &mut make).unwrap();

        assert!(Resource::same(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.count(&key), Some(2));
        assert_eq!(first.value().await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_untracked_entry_evicted_after_flush() {
        let (cache, flush) = cache();
        let key = CacheKey::from("now/");
        let resource = cache
            .acquire(&key, "", &Untracked, |key, _| {
                Resource::new(key.clone(), ok_loader(json!("t")))
            })
            .unwrap();
        assert_eq!(cache.count(&key), Some(0));

        resource.value().await.unwrap();
        assert!(cache.contains(&key));
        flush.flush();
        assert!(!cache.contains(&key));
    }

    #[tokio::test]
    async fn test_failed_entry_evicted_immediately() {
        let (cache, flush) = cache();
        let key = CacheKey::from("broken/");
        let scope = Scope::new();
        let resource = cache
            .acquire(&key, "", &scope, |key, _| {
                let loader: Loader = Arc::new(|| {
                    async { Err::<Value, _>(RemoteError::http(Some(500), json!("boom"))) }.boxed()
                });
                Resource::new(key.clone(), loader)
            })
            .unwrap();

        assert!(resource.value().await.is_err());
        assert_eq!(flush.pending(), 0);
        assert!(!cache.contains(&key));
    }

    #[tokio::test]
    async fn test_guard_keeps_entry_alive() {
        let (cache, flush) = cache();
        let key = CacheKey::from("q/");
        let resource = cache
            .acquire(&key, "", &Untracked, |key, _| {
                Resource::new(key.clone(), ok_loader(json!(1)))
            })
            .unwrap();
        let guard = cache.register_consumer(&key).unwrap();
        assert_eq!(cache.count(&key), Some(1));

        resource.value().await.unwrap();
        flush.flush();
        assert!(cache.contains(&key));

        guard.detach();
        assert_eq!(cache.count(&key), Some(0));
        flush.flush();
        assert!(!cache.contains(&key));
    }

    #[tokio::test]
    async fn test_seeded_response_cleared_on_detach_eviction() {
        let (cache, flush) = cache();
        let key = CacheKey::from("q/seeded");
        cache.seed_response(key.clone(), json!("ssr"));

        let scope = Scope::new();
        let resource = cache
            .acquire(&key, "seeded", &scope, |key, _| {
                Resource::ready(key.clone(), json!("ssr"), ok_loader(json!("fresh")))
            })
            .unwrap();
        assert_eq!(resource.value().await.unwrap(), json!("ssr"));

        scope.detach();
        flush.flush();
        assert!(!cache.contains(&key));
        assert_eq!(cache.cached_response(&key), None);
    }

    #[test]
    fn test_miss_without_runtime_leaves_cache_unchanged() {
        let (cache, flush) = cache();
        let key = CacheKey::from("offline/");
        let scope = Scope::new();
        let mut built = false;

        let err = cache
            .acquire(&key, "", &scope, |key, _| {
                built = true;
                Resource::new(key.clone(), ok_loader(json!(1)))
            })
            .unwrap_err();
        assert!(matches!(err, RemoteError::Transport { status: None, .. }));
        assert!(!built);
        assert!(cache.is_empty());

        // The teardown registered by the failed call releases nothing
        scope.detach();
        assert_eq!(flush.pending(), 0);
    }

    #[test]
    fn test_hit_without_runtime() {
        let (cache, _flush) = cache();
        let key = CacheKey::from("warm/");
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let first = rt.block_on(async {
            let resource = cache
                .acquire(&key, "", &Untracked, |key, _| {
                    Resource::new(key.clone(), ok_loader(json!(1)))
                })
                .unwrap();
            resource.value().await.unwrap();
            resource
        });

        let scope = Scope::new();
        let again = cache
            .acquire(&key, "", &scope, |_, _| unreachable!())
            .unwrap();
        assert!(Resource::same(&first, &again));
        assert_eq!(cache.count(&key), Some(1));
    }

    #[test]
    fn test_register_consumer_on_missing_key() {
        let (cache, _flush) = cache();
        assert!(cache.register_consumer(&CacheKey::from("nope/")).is_none());
    }
}
