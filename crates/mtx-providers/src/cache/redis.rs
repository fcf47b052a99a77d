//! Redis cache tier.
//!
//! Distributed tier of the result cache, sharing the backend with the
//! session store under a distinct key prefix. `clear` and `size` are
//! scoped to this instance's prefix so co-tenants of the database are
//! untouched.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tokio::sync::OnceCell;

use mtx_domain::error::{Error, Result};
use mtx_domain::ports::CacheProvider;

/// How many keys one SCAN iteration requests.
const SCAN_COUNT: usize = 100;

/// Redis-backed distributed cache tier.
pub struct RedisCacheProvider {
    client: Client,
    conn: OnceCell<ConnectionManager>,
    scope_prefix: String,
}

impl RedisCacheProvider {
    /// Create a tier for `url`, scoped to keys starting with `scope_prefix`.
    ///
    /// # Errors
    ///
    /// Returns `Storage` when the URL cannot be parsed.
    pub fn new<S: Into<String>>(url: &str, scope_prefix: S) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| Error::storage_with_source(format!("invalid Redis URL {url}"), e))?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            scope_prefix: scope_prefix.into(),
        })
    }

    async fn manager(&self) -> Result<ConnectionManager> {
        let manager = self
            .conn
            .get_or_try_init(|| async {
                ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(|e| Error::storage_with_source("Redis connection failed", e))
            })
            .await?;
        Ok(manager.clone())
    }

    async fn scan_keys(conn: &mut ConnectionManager, pattern: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(conn)
                .await
                .map_err(|e| Error::storage_with_source("Redis SCAN failed", e))?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.manager().await?;
        let keys = Self::scan_keys(&mut conn, pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut removed: u64 = 0;
        for chunk in keys.chunks(SCAN_COUNT) {
            let deleted: i64 = redis::cmd("DEL")
                .arg(chunk)
                .query_async(&mut conn)
                .await
                .map_err(|e| Error::storage_with_source("Redis DEL failed", e))?;
            removed += u64::try_from(deleted).unwrap_or(0);
        }
        Ok(removed)
    }
}

#[async_trait]
impl CacheProvider for RedisCacheProvider {
    async fn get_json(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager().await?;
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::storage_with_source("Redis GET failed", e))
    }

    async fn set_json(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.manager().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            let secs = ttl.as_secs().max(1);
            cmd.arg("EX").arg(secs);
        }
        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::storage_with_source("Redis SET failed", e))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager().await?;
        let deleted: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::storage_with_source("Redis DEL failed", e))?;
        Ok(deleted == 1)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        self.delete_matching(&format!("{prefix}*")).await
    }

    async fn clear(&self) -> Result<()> {
        self.delete_matching(&format!("{}*", self.scope_prefix))
            .await
            .map(|_| ())
    }

    async fn size(&self) -> Result<usize> {
        let mut conn = self.manager().await?;
        let keys = Self::scan_keys(&mut conn, &format!("{}*", self.scope_prefix)).await?;
        Ok(keys.len())
    }

    fn provider_name(&self) -> &str {
        "redis"
    }
}

impl std::fmt::Debug for RedisCacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheProvider")
            .field("scope_prefix", &self.scope_prefix)
            .finish()
    }
}
