//! Reconciling optimistic overrides with server-confirmed refreshes.

use crate::cache::ResourceCache;
use crate::resource::{Override, Resource};
use remotefn_core::{CacheKey, Codec, RemoteError};
use tracing::debug;

/// A query touched by a mutation: either refreshed as-is or with a pending override
#[derive(Debug, Clone)]
pub enum Update {
    Query(Resource),
    Override(Override),
}

impl Update {
    pub fn key(&self) -> &CacheKey {
        match self {
            Update::Query(resource) => resource.key(),
            Update::Override(pending) => pending.key(),
        }
    }
}

impl From<Resource> for Update {
    fn from(resource: Resource) -> Self {
        Update::Query(resource)
    }
}

impl From<Override> for Update {
    fn from(pending: Override) -> Self {
        Update::Override(pending)
    }
}

/// Release every override in `updates`; plain queries are skipped
pub fn release_overrides(updates: &[Update]) {
    for update in updates {
        if let Update::Override(pending) = update {
            pending.release();
        }
    }
}

/// Apply server-sent refreshes in the order they were encoded.
///
/// For each key, a matching pending override is released before the cached
/// resource receives the new value. Keys without a cache entry are ignored.
/// A payload that fails to decode changes nothing.
pub fn apply_refresh(
    cache: &ResourceCache,
    codec: &Codec,
    encoded: &str,
    updates: &[Update],
) -> Result<(), RemoteError> {
    let refreshes = codec.parse_map(encoded)?;
    debug!("Applying {} refreshed queries", refreshes.len());

    for (key, value) in refreshes {
        let key = CacheKey::new(key);

        let pending = updates.iter().find_map(|update| match update {
            Update::Override(pending) if pending.key() == &key => Some(pending),
            _ => None,
        });
        if let Some(pending) = pending {
            pending.release();
        }

        if let Some(resource) = cache.get(&key) {
            resource.set(value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{ManualFlush, Scope};
    use crate::resource::{Loader, ResourceState};
    use futures::FutureExt;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn loader() -> Loader {
        Arc::new(|| async { Ok::<_, RemoteError>(Value::Null) }.boxed())
    }

    fn seeded(cache: &ResourceCache, scope: &Scope, key: &str, value: Value) -> Resource {
        cache
            .acquire(&CacheKey::from(key), "", scope, |key, _| {
                Resource::ready(key.clone(), value, loader())
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_release_before_set() {
        let cache = ResourceCache::new(Arc::new(ManualFlush::new()));
        let scope = Scope::new();
        let q1 = seeded(&cache, &scope, "q1", json!(1));
        let optimistic = q1.with_override(|_| json!(41));
        assert_eq!(q1.current(), Some(json!(41)));

        let mut rx = q1.subscribe();
        rx.borrow_and_update();

        apply_refresh(
            &cache,
            &Codec::new(),
            r#"{"q1":42}"#,
            &[Update::from(optimistic.clone())],
        )
        .unwrap();

        assert!(optimistic.is_released());
        assert_eq!(q1.override_count(), 0);
        assert_eq!(*rx.borrow_and_update(), ResourceState::Ready(json!(42)));
        assert_eq!(q1.current(), Some(json!(42)));
    }

    #[tokio::test]
    async fn test_refresh_replaces_in_place() {
        let cache = ResourceCache::new(Arc::new(ManualFlush::new()));
        let scope = Scope::new();
        let a = seeded(&cache, &scope, "a", json!("old-a"));
        let b = seeded(&cache, &scope, "b", json!("old-b"));

        apply_refresh(
            &cache,
            &Codec::new(),
            r#"{"b":"new-b","missing":1,"a":"new-a"}"#,
            &[Update::from(a.clone())],
        )
        .unwrap();

        assert!(Resource::same(&cache.get(&CacheKey::from("a")).unwrap(), &a));
        assert_eq!(a.current(), Some(json!("new-a")));
        assert_eq!(b.current(), Some(json!("new-b")));
        assert!(!cache.contains(&CacheKey::from("missing")));
    }

    #[tokio::test]
    async fn test_malformed_refresh_changes_nothing() {
        let cache = ResourceCache::new(Arc::new(ManualFlush::new()));
        let scope = Scope::new();
        let q = seeded(&cache, &scope, "q", json!(1));
        let optimistic = q.with_override(|_| json!(2));

        let err = apply_refresh(&cache, &Codec::new(), "{not json", &[optimistic.clone().into()])
            .unwrap_err();
        assert!(matches!(err, RemoteError::Encoding(_)));
        assert!(!optimistic.is_released());
        assert_eq!(q.current(), Some(json!(2)));
    }

    #[test]
    fn test_release_overrides_skips_queries() {
        let resource = Resource::ready(CacheKey::from("q"), json!(0), loader());
        let first = resource.with_override(|_| json!(1));
        let second = resource.with_override(|_| json!(2));

        release_overrides(&[
            Update::from(resource.clone()),
            Update::from(first.clone()),
            Update::from(second.clone()),
        ]);

        assert!(first.is_released());
        assert!(second.is_released());
        assert_eq!(resource.current(), Some(json!(0)));

        // Already released: second pass is a no-op
        release_overrides(&[Update::from(first.clone())]);
        assert!(!first.release());
    }
}
