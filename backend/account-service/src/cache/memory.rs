use super::CacheStore;
use crate::error::Result;
use async_trait::async_trait;
use cache_invalidation::helpers::matches_pattern;
use dashmap::DashMap;

/// Per-process cache; each process holds its own copy
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, String>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !matches_pattern(pattern, key));
        Ok(before.saturating_sub(self.entries.len()))
    }
}
