//! Moka in-memory cache tier.
//!
//! Bounded LRU tier sitting in front of the distributed tier. Moka only
//! supports a cache-wide TTL, so per-entry TTLs are carried inside the
//! stored value and checked on read.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;

use mtx_domain::error::{Error, Result};
use mtx_domain::ports::CacheProvider;

/// Process-local LRU cache tier backed by Moka.
#[derive(Clone)]
pub struct MokaCacheProvider {
    cache: Cache<String, CachedValue>,
    max_entries: u64,
}

#[derive(Clone)]
struct CachedValue {
    json: Arc<String>,
    expires_at: Option<Instant>,
}

impl MokaCacheProvider {
    /// Create a tier bounded to `max_entries` entries.
    #[must_use]
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .support_invalidation_closures()
            .build();
        Self { cache, max_entries }
    }

    /// Maximum number of entries this tier retains.
    #[must_use]
    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }
}

#[async_trait]
impl CacheProvider for MokaCacheProvider {
    async fn get_json(&self, key: &str) -> Result<Option<String>> {
        if let Some(cached) = self.cache.get(key).await {
            if cached
                .expires_at
                .is_some_and(|expires_at| Instant::now() >= expires_at)
            {
                self.cache.invalidate(key).await;
                return Ok(None);
            }
            Ok(Some(cached.json.as_ref().clone()))
        } else {
            Ok(None)
        }
    }

    async fn set_json(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.cache
            .insert(
                key.to_owned(),
                CachedValue {
                    json: Arc::new(value.to_owned()),
                    expires_at,
                },
            )
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.cache.contains_key(key);
        self.cache.invalidate(key).await;
        Ok(existed)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let removed = self
            .cache
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .count() as u64;
        let owned_prefix = prefix.to_owned();
        self.cache
            .invalidate_entries_if(move |key, _| key.starts_with(&owned_prefix))
            .map_err(|e| Error::storage(format!("cache invalidation failed: {e}")))?;
        self.cache.run_pending_tasks().await;
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn size(&self) -> Result<usize> {
        // Run pending tasks so entry_count is accurate.
        self.cache.run_pending_tasks().await;
        Ok(usize::try_from(self.cache.entry_count()).unwrap_or(usize::MAX))
    }

    fn provider_name(&self) -> &str {
        "moka"
    }
}

impl std::fmt::Debug for MokaCacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaCacheProvider")
            .field("max_entries", &self.max_entries)
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}
