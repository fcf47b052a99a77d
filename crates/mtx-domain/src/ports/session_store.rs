//! Session store port.
//!
//! The store persists [`Session`] payloads under `{prefix}session:{id}` and
//! lock records under `{prefix}lock:{id}`. Two implementations exist — an
//! in-process map for development and a Redis-backed store for production —
//! and everything downstream of the factory is variant-agnostic.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::session::Session;

/// Unguessable lock ownership token.
///
/// Returned by [`SessionStore::acquire_lock`]; releasing requires the
/// matching token. A release with a non-matching token is a no-op that
/// returns `false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    /// Wrap a raw token string.
    #[must_use]
    pub fn new<S: Into<String>>(raw: S) -> Self {
        Self(raw.into())
    }

    /// The raw token value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a caller-supplied TTL: `0` means "no expiry", negative values
/// are rejected.
///
/// # Errors
///
/// Returns `SchemaViolation` for negative TTLs.
pub fn normalize_ttl_secs(ttl: i64) -> crate::error::Result<u64> {
    u64::try_from(ttl)
        .map_err(|_| crate::error::Error::schema_violation("ttl must not be negative"))
}

/// Abstract session store contract. All operations are asynchronous.
///
/// TTL semantics: a TTL of `0` seconds means "no expiry". Negative TTLs are
/// rejected upstream at the service boundary before reaching the store.
#[async_trait]
pub trait SessionStore: Send + Sync + std::fmt::Debug {
    /// Fetch and deserialize a session.
    ///
    /// # Errors
    ///
    /// `CorruptedSession` when the stored payload cannot be parsed;
    /// `Storage` on backend failure; `StoreClosed` after [`Self::disconnect`].
    async fn get_session(&self, id: &str) -> Result<Option<Session>>;

    /// Overwrite a session and arm its TTL.
    async fn set_session(&self, id: &str, session: &Session, ttl_secs: u64) -> Result<()>;

    /// Remove a session. Idempotent.
    async fn clear_session(&self, id: &str) -> Result<()>;

    /// Best-effort enumeration of live session ids; not a snapshot.
    async fn session_ids(&self) -> Result<Vec<String>>;

    /// Re-arm a session's TTL. Returns `false` iff the session is absent.
    async fn extend_session_ttl(&self, id: &str, ttl_secs: u64) -> Result<bool>;

    /// Remaining TTL in seconds, or `None` iff the session is absent.
    ///
    /// The in-memory backend cannot observe a timer's remaining time and is
    /// permitted to report its configured default instead.
    async fn get_session_ttl(&self, id: &str) -> Result<Option<u64>>;

    /// Non-blocking lock acquisition. `None` means someone else holds the
    /// lock. The lock auto-releases after `timeout` (backend default when
    /// unspecified).
    async fn acquire_lock(&self, id: &str, timeout: Option<Duration>) -> Result<Option<LockToken>>;

    /// Atomic compare-and-delete release. Returns `false` iff the token
    /// mismatched or the lock already expired.
    async fn release_lock(&self, id: &str, token: &LockToken) -> Result<bool>;

    /// Read-through-with-default: returns the stored session if present,
    /// otherwise persists and returns `init`. No lock required.
    async fn create_session_if_absent(&self, id: &str, init: Session) -> Result<Session>;

    /// Release resources. Subsequent operations fail with `StoreClosed`.
    async fn disconnect(&self) -> Result<()>;

    /// Backend name for diagnostics ("memory", "redis").
    fn backend_name(&self) -> &'static str;
}
