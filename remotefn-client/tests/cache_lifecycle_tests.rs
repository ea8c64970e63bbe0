// Cache lifecycle tests: reference counting, deferred eviction, failures

use futures::FutureExt;
use proptest::prelude::*;
use remotefn_client::{
    CacheKey, ConsumerScope, Loader, ManualFlush, RemoteError, Resource, ResourceCache, Scope,
    Untracked,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn counting_loader(calls: Arc<AtomicUsize>, outcome: Result<Value, RemoteError>) -> Loader {
    Arc::new(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        let outcome = outcome.clone();
        async move { outcome }.boxed()
    })
}

fn setup() -> (ResourceCache, Arc<ManualFlush>) {
    let flush = Arc::new(ManualFlush::new());
    (ResourceCache::new(flush.clone()), flush)
}

fn acquire(
    cache: &ResourceCache,
    scope: &dyn ConsumerScope,
    key: &str,
    loader: Loader,
) -> Resource {
    cache
        .acquire(&CacheKey::from(key), "", scope, |key, _| {
            Resource::new(key.clone(), loader)
        })
        .unwrap()
}

#[tokio::test]
async fn test_detach_and_reattach_in_one_cycle_keeps_entry() {
    let (cache, flush) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let loader = counting_loader(calls.clone(), Ok(json!("user")));

    let first = Scope::new();
    let resource = acquire(&cache, &first, "getUser/abc", loader.clone());
    assert_eq!(resource.value().await.unwrap(), json!("user"));

    // The old consumer goes away and a new one takes over before the flush
    first.detach();
    let second = Scope::new();
    let again = acquire(&cache, &second, "getUser/abc", loader);
    flush.flush();

    assert!(Resource::same(&resource, &again));
    assert_eq!(cache.count(&CacheKey::from("getUser/abc")), Some(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    second.detach();
    flush.flush();
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_count_tracks_consumers() {
    let (cache, flush) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let loader = counting_loader(calls.clone(), Ok(json!(1)));
    let key = CacheKey::from("count/x");

    let scopes: Vec<Scope> = (0..3).map(|_| Scope::new()).collect();
    for scope in &scopes {
        acquire(&cache, scope, "count/x", loader.clone());
    }
    assert_eq!(cache.count(&key), Some(3));

    // Untracked reads share the entry without holding it
    acquire(&cache, &Untracked, "count/x", loader);
    assert_eq!(cache.count(&key), Some(3));

    for scope in scopes {
        drop(scope);
        flush.flush();
    }
    assert!(!cache.contains(&key));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_evicted_key_loads_again() {
    let (cache, flush) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let loader = counting_loader(calls.clone(), Ok(json!(1)));

    let resource = acquire(&cache, &Untracked, "again/x", loader.clone());
    resource.value().await.unwrap();
    flush.flush();
    assert!(cache.is_empty());

    let fresh = acquire(&cache, &Untracked, "again/x", loader);
    fresh.value().await.unwrap();
    assert!(!Resource::same(&resource, &fresh));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failure_evicts_while_held() {
    let (cache, _flush) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let err = RemoteError::http(Some(404), json!("missing"));
    let loader = counting_loader(calls.clone(), Err(err.clone()));

    let scope = Scope::new();
    let resource = acquire(&cache, &scope, "fail/x", loader.clone());
    assert_eq!(resource.value().await.unwrap_err(), err);
    assert!(!cache.contains(&CacheKey::from("fail/x")));

    // The next caller retries instead of reusing the failure
    let retry = acquire(&cache, &scope, "fail/x", loader);
    assert!(!Resource::same(&resource, &retry));
    assert!(retry.value().await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_consumer_guard() {
    let (cache, flush) = setup();
    let loader = counting_loader(Arc::new(AtomicUsize::new(0)), Ok(json!(1)));
    let key = CacheKey::from("guard/x");

    assert!(cache.register_consumer(&key).is_none());

    acquire(&cache, &Untracked, "guard/x", loader).value().await.unwrap();
    let guard = cache.register_consumer(&key).unwrap();
    flush.flush();
    assert!(cache.contains(&key));

    guard.detach();
    flush.flush();
    assert!(!cache.contains(&key));
}

#[tokio::test]
async fn test_detached_scope_holds_nothing() {
    let (cache, flush) = setup();
    let loader = counting_loader(Arc::new(AtomicUsize::new(0)), Ok(json!(1)));
    let scope = Scope::new();
    scope.detach();

    let resource = acquire(&cache, &scope, "late/x", loader);
    assert_eq!(cache.count(&CacheKey::from("late/x")), Some(0));
    resource.value().await.unwrap();
    flush.flush();
    assert!(cache.is_empty());
}

proptest! {
    #[test]
    fn prop_entry_lives_while_held(ops in proptest::collection::vec(any::<bool>(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let _guard = rt.enter();
        let (cache, flush) = setup();
        let loader = counting_loader(Arc::new(AtomicUsize::new(0)), Ok(json!(1)));
        let key = CacheKey::from("prop/x");

        let mut scopes = vec![Scope::new()];
        acquire(&cache, &scopes[0], "prop/x", loader.clone());
        for attach in ops {
            if attach {
                let scope = Scope::new();
                acquire(&cache, &scope, "prop/x", loader.clone());
                scopes.push(scope);
            } else if let Some(scope) = scopes.pop() {
                drop(scope);
            }
        }

        // Nothing is evicted before the flush
        prop_assert_eq!(cache.count(&key), Some(scopes.len()));
        flush.flush();
        prop_assert_eq!(cache.contains(&key), !scopes.is_empty());
    }
}
