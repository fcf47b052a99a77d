//! Two-tier result cache.
//!
//! A bounded local LRU tier in front of an optional distributed tier
//! sharing the session store's backend under the `{prefix}cache:` key
//! space. Keys are canonical — equivalent parameter maps hash identically —
//! and namespaces scope invalidation: by convention the session id (one
//! session's cached work) or the tool id (a tool's results globally).
//!
//! The cache is lock-free: last write wins within the TTL window. A failing
//! distributed tier degrades to the local tier with a warning rather than
//! failing the invocation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mtx_domain::error::Result;
use mtx_domain::ports::CacheProvider;

/// Configuration for the two-tier cache.
#[derive(Debug, Clone)]
pub struct ResultCacheConfig {
    /// Prefix shared with the session store keys (`mcp:` by default).
    pub key_prefix: String,
    /// TTL applied when the tool declares none, in seconds.
    pub default_ttl_secs: u64,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "mcp:".to_owned(),
            default_ttl_secs: 300,
        }
    }
}

/// Read-only cache counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered by either tier.
    pub hits: u64,
    /// Lookups answered by neither tier.
    pub misses: u64,
    /// Writes through [`ResultCache::set`].
    pub sets: u64,
    /// Live entries in the memory tier.
    pub size: usize,
    /// `hits / (hits + misses)`, `0.0` when no lookups happened.
    pub hit_rate: f64,
}

/// Two-tier cache keyed by `tool-id + ":" + canonical-json(params)`.
pub struct ResultCache {
    local: Arc<dyn CacheProvider>,
    distributed: Option<Arc<dyn CacheProvider>>,
    config: ResultCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
}

impl ResultCache {
    /// Compose the tiers. `distributed` is `None` when the factory fell
    /// back to the in-memory session store.
    #[must_use]
    pub fn new(
        local: Arc<dyn CacheProvider>,
        distributed: Option<Arc<dyn CacheProvider>>,
        config: ResultCacheConfig,
    ) -> Self {
        Self {
            local,
            distributed,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
        }
    }

    /// Full storage key: `{prefix}cache:{namespace?}:{key}`.
    #[must_use]
    pub fn storage_key(&self, key: &str, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => format!("{}cache:{ns}:{key}", self.config.key_prefix),
            None => format!("{}cache:{key}", self.config.key_prefix),
        }
    }

    fn namespace_prefix(&self, namespace: &str) -> String {
        format!("{}cache:{namespace}:", self.config.key_prefix)
    }

    /// Look up a cached value.
    ///
    /// # Errors
    ///
    /// Local-tier failures propagate; distributed-tier failures degrade to
    /// a miss with a warning.
    pub async fn get(&self, key: &str, namespace: Option<&str>) -> Result<Option<Value>> {
        let storage_key = self.storage_key(key, namespace);

        if let Some(json) = self.local.get_json(&storage_key).await? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(serde_json::from_str(&json)?));
        }

        if let Some(distributed) = &self.distributed {
            match distributed.get_json(&storage_key).await {
                Ok(Some(json)) => {
                    // Promote to the local tier for subsequent lookups.
                    let ttl = Duration::from_secs(self.config.default_ttl_secs);
                    self.local.set_json(&storage_key, &json, Some(ttl)).await?;
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(serde_json::from_str(&json)?));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key = storage_key, error = %e, "distributed cache read failed");
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Store a value in both tiers.
    ///
    /// # Errors
    ///
    /// Local-tier failures propagate; distributed-tier failures are logged
    /// and swallowed (the entry stays readable locally).
    pub async fn set(
        &self,
        key: &str,
        value: &Value,
        ttl_secs: Option<u64>,
        namespace: Option<&str>,
    ) -> Result<()> {
        let storage_key = self.storage_key(key, namespace);
        let json = serde_json::to_string(value)?;
        let ttl_secs = ttl_secs.unwrap_or(self.config.default_ttl_secs);
        let ttl = (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs));

        self.local.set_json(&storage_key, &json, ttl).await?;
        if let Some(distributed) = &self.distributed {
            if let Err(e) = distributed.set_json(&storage_key, &json, ttl).await {
                tracing::warn!(key = storage_key, error = %e, "distributed cache write failed");
            }
        }
        self.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Remove one entry from both tiers. Returns whether any tier held it.
    ///
    /// # Errors
    ///
    /// Propagates local-tier failures.
    pub async fn delete(&self, key: &str, namespace: Option<&str>) -> Result<bool> {
        let storage_key = self.storage_key(key, namespace);
        let mut existed = self.local.delete(&storage_key).await?;
        if let Some(distributed) = &self.distributed {
            match distributed.delete(&storage_key).await {
                Ok(removed) => existed = existed || removed,
                Err(e) => {
                    tracing::warn!(key = storage_key, error = %e, "distributed cache delete failed");
                }
            }
        }
        Ok(existed)
    }

    /// Batched lookup; result order matches input order.
    ///
    /// # Errors
    ///
    /// Propagates the first lookup failure.
    pub async fn get_many(
        &self,
        keys: &[String],
        namespace: Option<&str>,
    ) -> Result<Vec<Option<Value>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key, namespace).await?);
        }
        Ok(values)
    }

    /// Batched store.
    ///
    /// # Errors
    ///
    /// Propagates the first write failure.
    pub async fn set_many(
        &self,
        entries: &[(String, Value)],
        ttl_secs: Option<u64>,
        namespace: Option<&str>,
    ) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value, ttl_secs, namespace).await?;
        }
        Ok(())
    }

    /// Remove every entry in a namespace from both tiers. Returns the
    /// number of entries removed from the distributed tier when present,
    /// otherwise from the local tier.
    ///
    /// # Errors
    ///
    /// Propagates local-tier failures.
    pub async fn invalidate_namespace(&self, namespace: &str) -> Result<u64> {
        let prefix = self.namespace_prefix(namespace);
        let local_removed = self.local.delete_prefix(&prefix).await?;
        if let Some(distributed) = &self.distributed {
            match distributed.delete_prefix(&prefix).await {
                Ok(removed) => return Ok(removed),
                Err(e) => {
                    tracing::warn!(namespace, error = %e, "distributed namespace invalidation failed");
                }
            }
        }
        Ok(local_removed)
    }

    /// Read-only counters snapshot.
    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            size: self.local.size().await.unwrap_or(0),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("local", &self.local.provider_name())
            .field(
                "distributed",
                &self.distributed.as_deref().map(CacheProvider::provider_name),
            )
            .finish()
    }
}
