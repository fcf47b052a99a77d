//! In-memory session store.
//!
//! Development and fallback backend: a per-process map with TTLs driven by
//! spawned timer tasks. On every set the prior timer is aborted and a new
//! one armed. Locks are plain records with an auto-release timer. No
//! cross-process visibility — not for production.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use mtx_domain::error::{Error, Result};
use mtx_domain::ports::{LockToken, SessionStore};
use mtx_domain::registry::session_store::SessionStoreConfig;
use mtx_domain::session::Session;

use super::{generate_token, lock_key, session_key};

/// Per-process session store with timer-based TTLs and token locks.
pub struct InMemorySessionStore {
    inner: Arc<Inner>,
}

struct Inner {
    sessions: DashMap<String, String>,
    session_timers: DashMap<String, JoinHandle<()>>,
    locks: DashMap<String, String>,
    lock_timers: DashMap<String, JoinHandle<()>>,
    config: SessionStoreConfig,
    closed: AtomicBool,
}

impl InMemorySessionStore {
    /// Create a store with the given configuration.
    #[must_use]
    pub fn new(config: SessionStoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                session_timers: DashMap::new(),
                locks: DashMap::new(),
                lock_timers: DashMap::new(),
                config,
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::StoreClosed);
        }
        Ok(())
    }

    fn session_key(&self, id: &str) -> String {
        session_key(&self.inner.config.key_prefix, id)
    }

    fn lock_key(&self, id: &str) -> String {
        lock_key(&self.inner.config.key_prefix, id)
    }

    /// Arm (or disarm, for `ttl_secs == 0`) the expiry timer for a session key.
    fn arm_session_timer(&self, key: &str, ttl_secs: u64) {
        if let Some((_, old)) = self.inner.session_timers.remove(key) {
            old.abort();
        }
        if ttl_secs == 0 {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let owned_key = key.to_owned();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(ttl_secs)).await;
            if let Some(inner) = weak.upgrade() {
                inner.sessions.remove(&owned_key);
                inner.session_timers.remove(&owned_key);
            }
        });
        self.inner.session_timers.insert(key.to_owned(), handle);
    }

    fn arm_lock_timer(&self, key: &str, timeout: Duration) {
        if let Some((_, old)) = self.inner.lock_timers.remove(key) {
            old.abort();
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let owned_key = key.to_owned();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.locks.remove(&owned_key);
                inner.lock_timers.remove(&owned_key);
            }
        });
        self.inner.lock_timers.insert(key.to_owned(), handle);
    }

    fn parse_session(&self, id: &str, payload: &str) -> Result<Session> {
        serde_json::from_str(payload)
            .map_err(|e| Error::corrupted_session(id, e.to_string()))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        self.ensure_open()?;
        let key = self.session_key(id);
        match self.inner.sessions.get(&key) {
            Some(payload) => Ok(Some(self.parse_session(id, payload.value())?)),
            None => Ok(None),
        }
    }

    async fn set_session(&self, id: &str, session: &Session, ttl_secs: u64) -> Result<()> {
        self.ensure_open()?;
        let key = self.session_key(id);
        let payload = serde_json::to_string(session)?;
        self.inner.sessions.insert(key.clone(), payload);
        self.arm_session_timer(&key, ttl_secs);
        Ok(())
    }

    async fn clear_session(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        let key = self.session_key(id);
        self.inner.sessions.remove(&key);
        if let Some((_, timer)) = self.inner.session_timers.remove(&key) {
            timer.abort();
        }
        Ok(())
    }

    async fn session_ids(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let marker = format!("{}session:", self.inner.config.key_prefix);
        Ok(self
            .inner
            .sessions
            .iter()
            .filter_map(|entry| entry.key().strip_prefix(&marker).map(ToOwned::to_owned))
            .collect())
    }

    async fn extend_session_ttl(&self, id: &str, ttl_secs: u64) -> Result<bool> {
        self.ensure_open()?;
        let key = self.session_key(id);
        if !self.inner.sessions.contains_key(&key) {
            return Ok(false);
        }
        self.arm_session_timer(&key, ttl_secs);
        Ok(true)
    }

    async fn get_session_ttl(&self, id: &str) -> Result<Option<u64>> {
        self.ensure_open()?;
        let key = self.session_key(id);
        // Timer remaining time is not observable; report the configured
        // default for live sessions, as the contract permits.
        if self.inner.sessions.contains_key(&key) {
            Ok(Some(self.inner.config.default_ttl_secs))
        } else {
            Ok(None)
        }
    }

    async fn acquire_lock(
        &self,
        id: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<LockToken>> {
        self.ensure_open()?;
        let key = self.lock_key(id);
        let timeout =
            timeout.unwrap_or(Duration::from_millis(self.inner.config.lock_timeout_ms));

        match self.inner.locks.entry(key.clone()) {
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(vacant) => {
                let token = generate_token();
                vacant.insert(token.clone());
                self.arm_lock_timer(&key, timeout);
                Ok(Some(LockToken::new(token)))
            }
        }
    }

    async fn release_lock(&self, id: &str, token: &LockToken) -> Result<bool> {
        self.ensure_open()?;
        let key = self.lock_key(id);
        let removed = self
            .inner
            .locks
            .remove_if(&key, |_, held| held == token.as_str())
            .is_some();
        if removed {
            if let Some((_, timer)) = self.inner.lock_timers.remove(&key) {
                timer.abort();
            }
        }
        Ok(removed)
    }

    async fn create_session_if_absent(&self, id: &str, init: Session) -> Result<Session> {
        self.ensure_open()?;
        let key = self.session_key(id);
        match self.inner.sessions.entry(key.clone()) {
            Entry::Occupied(existing) => self.parse_session(id, existing.get()),
            Entry::Vacant(vacant) => {
                vacant.insert(serde_json::to_string(&init)?);
                self.arm_session_timer(&key, self.inner.config.default_ttl_secs);
                Ok(init)
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        for entry in self.inner.session_timers.iter() {
            entry.value().abort();
        }
        for entry in self.inner.lock_timers.iter() {
            entry.value().abort();
        }
        self.inner.session_timers.clear();
        self.inner.lock_timers.clear();
        self.inner.sessions.clear();
        self.inner.locks.clear();
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for InMemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySessionStore")
            .field("sessions", &self.inner.sessions.len())
            .field("locks", &self.inner.locks.len())
            .finish()
    }
}

// ============================================================================
// Auto-registration via linkme distributed slice
// ============================================================================

use mtx_domain::registry::session_store::{SessionStoreEntry, SESSION_STORE_PROVIDERS};

fn memory_store_factory(
    config: &SessionStoreConfig,
) -> std::result::Result<Arc<dyn SessionStore>, String> {
    Ok(Arc::new(InMemorySessionStore::new(config.clone())))
}

#[linkme::distributed_slice(SESSION_STORE_PROVIDERS)]
static MEMORY_PROVIDER: SessionStoreEntry = SessionStoreEntry {
    name: "memory",
    description: "Per-process in-memory session store (development/fallback)",
    requires_url: false,
    build: memory_store_factory,
};
