//! Bus subscription that keeps user caches coherent with the directory
//!
//! The subscriber never holds the cache it evicts from. Every message looks
//! the cache up in a [`CacheRegistry`] by key, so the cache can be replaced or
//! torn down while the subscription is live and tests can run isolated
//! registries side by side.

use crate::cache::UserCache;
use cache_invalidation::{
    AccountEvent, InvalidationError, InvalidationMessage, InvalidationSubscriber,
    LocalInvalidationBus,
};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Registry key of the process-wide user cache
pub const USER_CACHE: &str = "user_cache";

/// Owned, injectable home for process-wide caches
#[derive(Clone, Default)]
pub struct CacheRegistry {
    caches: Arc<DashMap<String, Arc<UserCache>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cache previously registered under `key`, if any
    pub fn register(&self, key: impl Into<String>, cache: Arc<UserCache>) -> Option<Arc<UserCache>> {
        self.caches.insert(key.into(), cache)
    }

    pub fn resolve(&self, key: &str) -> Option<Arc<UserCache>> {
        self.caches.get(key).map(|c| Arc::clone(&c))
    }

    pub fn remove(&self, key: &str) -> Option<Arc<UserCache>> {
        self.caches.remove(key).map(|(_, cache)| cache)
    }
}

/// Decode `msg` and evict from whichever cache is registered under `key` now.
pub async fn handle_message(
    registry: &CacheRegistry,
    key: &str,
    msg: InvalidationMessage,
) -> cache_invalidation::Result<()> {
    let events = AccountEvent::from_message(&msg)?;
    if events.is_empty() {
        return Ok(());
    }

    let Some(cache) = registry.resolve(key) else {
        debug!(key = %key, "No cache registered, dropping invalidation");
        return Ok(());
    };

    for event in events {
        cache
            .apply(event)
            .await
            .map_err(|e| InvalidationError::CallbackFailed(e.to_string()))?;
    }
    Ok(())
}

/// A running subscription; created at process start, stopped at shutdown
pub struct InvalidationListener {
    handle: JoinHandle<()>,
    registry: CacheRegistry,
    key: String,
}

impl InvalidationListener {
    pub fn attach_local(
        bus: &LocalInvalidationBus,
        registry: CacheRegistry,
        key: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let (callback_registry, callback_key) = (registry.clone(), key.clone());
        let handle = bus.subscribe(move |msg| {
            let registry = callback_registry.clone();
            let key = callback_key.clone();
            async move { handle_message(&registry, &key, msg).await }
        });

        info!(key = %key, "User cache listening on local bus");
        Self {
            handle,
            registry,
            key,
        }
    }

    pub async fn attach_redis(
        subscriber: &InvalidationSubscriber,
        registry: CacheRegistry,
        key: impl Into<String>,
    ) -> cache_invalidation::Result<Self> {
        let key = key.into();
        let (callback_registry, callback_key) = (registry.clone(), key.clone());
        let handle = subscriber
            .subscribe(move |msg| {
                let registry = callback_registry.clone();
                let key = callback_key.clone();
                async move { handle_message(&registry, &key, msg).await }
            })
            .await?;

        info!(key = %key, "User cache listening on Redis bus");
        Ok(Self {
            handle,
            registry,
            key,
        })
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop consuming and tear down the cache this listener served
    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
        if self.registry.remove(&self.key).is_some() {
            info!(key = %self.key, "User cache torn down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{MemoryUserDirectory, UserDirectory};
    use cache_invalidation::{EntityType, InvalidationSink};
    use std::time::Duration;
    use uuid::Uuid;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_message_without_registered_cache_is_dropped() {
        let registry = CacheRegistry::new();
        let msg = AccountEvent::UserChanged {
            user_id: Uuid::new_v4(),
        }
        .into_message("test".into());
        handle_message(&registry, USER_CACHE, msg).await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_entity_is_ignored() {
        let registry = CacheRegistry::new();
        let msg = InvalidationMessage::update(EntityType::Tweet, "42".into(), "test".into());
        handle_message(&registry, USER_CACHE, msg).await.unwrap();
    }

    #[tokio::test]
    async fn test_cache_is_resolved_at_delivery_time() {
        let directory = Arc::new(MemoryUserDirectory::new());
        let user = directory.insert_user("late", "").await.unwrap();
        let bus = LocalInvalidationBus::new("test");
        let registry = CacheRegistry::new();

        // Subscribe before any cache exists.
        let listener = InvalidationListener::attach_local(&bus, registry.clone(), USER_CACHE);

        let cache = Arc::new(UserCache::in_memory(directory.clone()));
        registry.register(USER_CACHE, cache.clone());
        cache.get_user(user.id).await.unwrap();

        bus.user_changed(user.id).await.unwrap();
        settle().await;

        let reads_before = directory.reads();
        cache.get_user(user.id).await.unwrap();
        assert_eq!(directory.reads(), reads_before + 1);

        listener.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_tears_down_cache() {
        let bus = LocalInvalidationBus::new("test");
        let registry = CacheRegistry::new();
        let directory: Arc<dyn UserDirectory> = Arc::new(MemoryUserDirectory::new());
        registry.register(USER_CACHE, Arc::new(UserCache::in_memory(directory)));

        let listener = InvalidationListener::attach_local(&bus, registry.clone(), USER_CACHE);
        assert!(listener.is_running());
        assert_eq!(bus.subscriber_count(), 1);

        listener.shutdown().await;
        assert!(registry.resolve(USER_CACHE).is_none());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
