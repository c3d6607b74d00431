//! Read-through user and profile cache
//!
//! Entries are stored as JSON under `user:{id}` and `profile:{id}`. They never
//! expire on their own; the invalidation listener evicts them when the
//! directory record changes.
//!
//! Every key carries a generation that invalidation bumps before deleting.
//! A miss remembers the generation before loading from the directory and
//! does not keep what it loaded if the generation moved meanwhile, so a slow
//! load can never put back a record an invalidation already evicted.

mod memory;
mod redis_store;

pub use memory::MemoryCacheStore;
pub use redis_store::RedisCacheStore;

use crate::directory::UserDirectory;
use crate::error::{AccountError, Result};
use crate::metrics;
use crate::models::{CachedProfile, CachedUser};
use async_trait::async_trait;
use cache_invalidation::{build_cache_key, AccountEvent, EntityType};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Key/value backend for [`UserCache`]
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Returns whether an entry was removed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key matching a `*` glob; returns the number removed
    async fn delete_matching(&self, pattern: &str) -> Result<usize>;
}

/// (clear epoch, per-key generation)
type Version = (u64, u64);

pub struct UserCache {
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn CacheStore>,
    generations: DashMap<String, u64>,
    epoch: AtomicU64,
}

impl UserCache {
    pub fn new(directory: Arc<dyn UserDirectory>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            directory,
            store,
            generations: DashMap::new(),
            epoch: AtomicU64::new(0),
        }
    }

    /// Cache backed by a fresh per-process store
    pub fn in_memory(directory: Arc<dyn UserDirectory>) -> Self {
        Self::new(directory, Arc::new(MemoryCacheStore::new()))
    }

    pub fn user_key(user_id: Uuid) -> String {
        build_cache_key(&EntityType::User, &user_id.to_string())
    }

    pub fn profile_key(user_id: Uuid) -> String {
        build_cache_key(&EntityType::Profile, &user_id.to_string())
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<CachedUser> {
        self.read_through("user", &Self::user_key(user_id), user_id, || {
            self.directory.get_user(user_id)
        })
        .await
    }

    pub async fn get_profile(&self, user_id: Uuid) -> Result<CachedProfile> {
        self.read_through("profile", &Self::profile_key(user_id), user_id, || {
            self.directory.get_profile(user_id)
        })
        .await
    }

    /// Idempotent
    pub async fn invalidate_user(&self, user_id: Uuid) -> Result<()> {
        let key = Self::user_key(user_id);
        self.bump(&key);
        let removed = self.store.delete(&key).await?;
        metrics::record_invalidation("user");
        debug!(user_id = %user_id, removed, "Invalidated cached user");
        Ok(())
    }

    /// Idempotent; leaves the cached user record in place
    pub async fn invalidate_profile(&self, user_id: Uuid) -> Result<()> {
        let key = Self::profile_key(user_id);
        self.bump(&key);
        let removed = self.store.delete(&key).await?;
        metrics::record_invalidation("profile");
        debug!(user_id = %user_id, removed, "Invalidated cached profile");
        Ok(())
    }

    /// Drop every cached user and profile
    pub async fn clear(&self) -> Result<usize> {
        // A new epoch outdates every in-flight load, so per-key counters
        // can start over.
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.generations.clear();
        let users = self.store.delete_matching("user:*").await?;
        let profiles = self.store.delete_matching("profile:*").await?;
        metrics::record_invalidation("all");
        debug!(users, profiles, "Cleared user cache");
        Ok(users + profiles)
    }

    /// Apply one decoded bus event
    pub async fn apply(&self, event: AccountEvent) -> Result<()> {
        match event {
            AccountEvent::UserChanged { user_id } => self.invalidate_user(user_id).await,
            AccountEvent::ProfileChanged { user_id } => self.invalidate_profile(user_id).await,
            AccountEvent::Resync => self.clear().await.map(|_| ()),
        }
    }

    fn version(&self, key: &str) -> Version {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let generation = self.generations.get(key).map(|g| *g).unwrap_or(0);
        (epoch, generation)
    }

    fn bump(&self, key: &str) {
        *self.generations.entry(key.to_string()).or_insert(0) += 1;
    }

    async fn read_through<T, F, Fut>(
        &self,
        entity: &'static str,
        key: &str,
        user_id: Uuid,
        load: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        // A broken cache degrades to directory reads; it never fails the lookup.
        match self.store.get(key).await {
            Ok(Some(json)) => match serde_json::from_str::<T>(&json) {
                Ok(value) => {
                    metrics::record_lookup(entity, "hit");
                    debug!(key = %key, "Cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                }
            },
            Ok(None) => {}
            Err(e) => {
                metrics::record_lookup(entity, "error");
                warn!(key = %key, error = %e, "Cache read failed, falling back to directory");
            }
        }

        metrics::record_lookup(entity, "miss");
        debug!(key = %key, "Cache miss");

        let seen = self.version(key);
        let value = load().await?.ok_or(AccountError::NotFound(user_id))?;
        if self.version(key) != seen {
            debug!(key = %key, "Invalidated during load, not caching");
            return Ok(value);
        }

        match serde_json::to_string(&value) {
            Ok(json) => {
                if let Err(e) = self.store.set(key, json).await {
                    warn!(key = %key, error = %e, "Cache populate failed");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "Failed to encode cache entry"),
        }

        // The invalidation may have deleted the key before our write landed
        if self.version(key) != seen {
            debug!(key = %key, "Invalidated while populating, evicting");
            if let Err(e) = self.store.delete(key).await {
                warn!(key = %key, error = %e, "Failed to evict raced cache entry");
            }
        }

        Ok(value)
    }
}
