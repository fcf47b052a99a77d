//! Redis session store.
//!
//! Production backend: sessions are stored as JSON strings with Redis-native
//! TTLs. Lock acquisition is an atomic `SET key token NX PX timeout`; lock
//! release is a compare-and-delete Lua script that deletes only when the
//! stored token matches. Any connection failure surfaces as a `Storage`
//! error, which the execution service treats as transient.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tokio::sync::OnceCell;

use mtx_domain::error::{Error, Result};
use mtx_domain::ports::{LockToken, SessionStore};
use mtx_domain::registry::session_store::SessionStoreConfig;
use mtx_domain::session::Session;

use super::{generate_token, lock_key, session_key};

/// Compare-and-delete: unlock only when the stored token matches.
const RELEASE_LOCK_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end";

/// How many keys one SCAN iteration requests.
const SCAN_COUNT: usize = 100;

/// Redis-backed session store with native TTLs and atomic locks.
pub struct RedisSessionStore {
    client: Client,
    conn: OnceCell<ConnectionManager>,
    config: SessionStoreConfig,
    closed: AtomicBool,
}

impl RedisSessionStore {
    /// Create a store for the configured URL. The connection is established
    /// lazily on first use.
    ///
    /// # Errors
    ///
    /// Returns `ConfigMissing` when the config carries no URL and `Storage`
    /// when the URL cannot be parsed.
    pub fn new(config: SessionStoreConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| Error::ConfigMissing("session store URL".to_owned()))?;
        let client = Client::open(url.as_str())
            .map_err(|e| Error::storage_with_source(format!("invalid Redis URL {url}"), e))?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// Probe backend availability: connect and `PING` within `timeout`.
    /// Returns `false` on any failure mode.
    pub async fn is_available(url: &str, timeout: Duration) -> bool {
        let Ok(client) = Client::open(url) else {
            return false;
        };
        let probe = async {
            let mut conn = client.get_multiplexed_async_connection().await.ok()?;
            redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .ok()
        };
        matches!(tokio::time::timeout(timeout, probe).await, Ok(Some(_)))
    }

    async fn manager(&self) -> Result<ConnectionManager> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::StoreClosed);
        }
        let manager = self
            .conn
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(|e| Error::storage_with_source("Redis connection failed", e))?;
                tracing::debug!(prefix = self.config.key_prefix, "Redis connection established");
                Ok::<ConnectionManager, Error>(manager)
            })
            .await?;
        Ok(manager.clone())
    }

    fn session_key(&self, id: &str) -> String {
        session_key(&self.config.key_prefix, id)
    }

    fn lock_key(&self, id: &str) -> String {
        lock_key(&self.config.key_prefix, id)
    }

    fn parse_session(id: &str, payload: &str) -> Result<Session> {
        serde_json::from_str(payload)
            .map_err(|e| Error::corrupted_session(id, e.to_string()))
    }

    async fn write_session(
        conn: &mut ConnectionManager,
        key: &str,
        payload: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(payload);
        if ttl_secs > 0 {
            cmd.arg("EX").arg(ttl_secs);
        }
        cmd.query_async::<()>(conn)
            .await
            .map_err(|e| Error::storage_with_source("Redis SET failed", e))
    }

    async fn scan_keys(&self, conn: &mut ConnectionManager, pattern: &str) -> Result<Vec<String>> {
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
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let mut conn = self.manager().await?;
        let payload: Option<String> = redis::cmd("GET")
            .arg(self.session_key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::storage_with_source("Redis GET failed", e))?;
        match payload {
            Some(payload) => Ok(Some(Self::parse_session(id, &payload)?)),
            None => Ok(None),
        }
    }

    async fn set_session(&self, id: &str, session: &Session, ttl_secs: u64) -> Result<()> {
        let mut conn = self.manager().await?;
        let payload = serde_json::to_string(session)?;
        Self::write_session(&mut conn, &self.session_key(id), &payload, ttl_secs).await
    }

    async fn clear_session(&self, id: &str) -> Result<()> {
        let mut conn = self.manager().await?;
        redis::cmd("DEL")
            .arg(self.session_key(id))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::storage_with_source("Redis DEL failed", e))
    }

    async fn session_ids(&self) -> Result<Vec<String>> {
        let mut conn = self.manager().await?;
        let marker = format!("{}session:", self.config.key_prefix);
        let keys = self.scan_keys(&mut conn, &format!("{marker}*")).await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(&marker).map(ToOwned::to_owned))
            .collect())
    }

    async fn extend_session_ttl(&self, id: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.manager().await?;
        let key = self.session_key(id);
        let applied: i64 = if ttl_secs == 0 {
            redis::cmd("PERSIST")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(|e| Error::storage_with_source("Redis PERSIST failed", e))?
        } else {
            redis::cmd("EXPIRE")
                .arg(&key)
                .arg(ttl_secs)
                .query_async(&mut conn)
                .await
                .map_err(|e| Error::storage_with_source("Redis EXPIRE failed", e))?
        };
        if applied == 1 {
            return Ok(true);
        }
        // PERSIST returns 0 both for "absent" and "already persistent";
        // disambiguate with an existence check.
        let exists: i64 = redis::cmd("EXISTS")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::storage_with_source("Redis EXISTS failed", e))?;
        Ok(exists == 1 && ttl_secs == 0)
    }

    async fn get_session_ttl(&self, id: &str) -> Result<Option<u64>> {
        let mut conn = self.manager().await?;
        let ttl: i64 = redis::cmd("TTL")
            .arg(self.session_key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::storage_with_source("Redis TTL failed", e))?;
        match ttl {
            -2 => Ok(None),
            // -1: key exists without expiry; report "no expiry" as 0.
            -1 => Ok(Some(0)),
            secs => Ok(Some(u64::try_from(secs).unwrap_or(0))),
        }
    }

    async fn acquire_lock(
        &self,
        id: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<LockToken>> {
        let mut conn = self.manager().await?;
        let timeout_ms = timeout.map_or(self.config.lock_timeout_ms, |t| {
            u64::try_from(t.as_millis()).unwrap_or(u64::MAX)
        });
        let token = generate_token();
        let set: Option<String> = redis::cmd("SET")
            .arg(self.lock_key(id))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(timeout_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::storage_with_source("Redis lock SET failed", e))?;
        Ok(set.map(|_| LockToken::new(token)))
    }

    async fn release_lock(&self, id: &str, token: &LockToken) -> Result<bool> {
        let mut conn = self.manager().await?;
        let deleted: i64 = redis::Script::new(RELEASE_LOCK_SCRIPT)
            .key(self.lock_key(id))
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::storage_with_source("Redis lock release failed", e))?;
        Ok(deleted == 1)
    }

    async fn create_session_if_absent(&self, id: &str, init: Session) -> Result<Session> {
        let mut conn = self.manager().await?;
        let key = self.session_key(id);
        let payload = serde_json::to_string(&init)?;

        for _ in 0..2 {
            let mut cmd = redis::cmd("SET");
            cmd.arg(&key).arg(&payload).arg("NX");
            if self.config.default_ttl_secs > 0 {
                cmd.arg("EX").arg(self.config.default_ttl_secs);
            }
            let created: Option<String> = cmd
                .query_async(&mut conn)
                .await
                .map_err(|e| Error::storage_with_source("Redis SET NX failed", e))?;
            if created.is_some() {
                return Ok(init);
            }

            let existing: Option<String> = redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(|e| Error::storage_with_source("Redis GET failed", e))?;
            if let Some(existing) = existing {
                return Self::parse_session(id, &existing);
            }
            // The key expired between SET NX and GET; try once more.
        }

        Self::write_session(&mut conn, &key, &payload, self.config.default_ttl_secs).await?;
        Ok(init)
    }

    async fn disconnect(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore")
            .field("prefix", &self.config.key_prefix)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

// ============================================================================
// Auto-registration via linkme distributed slice
// ============================================================================

use mtx_domain::registry::session_store::{SessionStoreEntry, SESSION_STORE_PROVIDERS};

fn redis_store_factory(
    config: &SessionStoreConfig,
) -> std::result::Result<Arc<dyn SessionStore>, String> {
    RedisSessionStore::new(config.clone())
        .map(|store| Arc::new(store) as Arc<dyn SessionStore>)
        .map_err(|e| e.to_string())
}

#[linkme::distributed_slice(SESSION_STORE_PROVIDERS)]
static REDIS_PROVIDER: SessionStoreEntry = SessionStoreEntry {
    name: "redis",
    description: "Redis-backed session store with native TTLs and atomic locks",
    requires_url: true,
    build: redis_store_factory,
};
