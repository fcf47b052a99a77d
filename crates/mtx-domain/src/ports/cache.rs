//! Cache provider port.
//!
//! One tier of the result cache: either the process-local LRU or the
//! distributed backend. The two-tier composition lives in the application
//! layer; providers only move JSON strings.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Single cache tier over JSON string values.
#[async_trait]
pub trait CacheProvider: Send + Sync + std::fmt::Debug {
    /// Fetch a raw JSON value.
    async fn get_json(&self, key: &str) -> Result<Option<String>>;

    /// Store a raw JSON value with an optional per-entry TTL.
    async fn set_json(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Remove one entry. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every entry whose key starts with `prefix`. Returns the
    /// number of entries removed (best-effort on backends that cannot
    /// count precisely).
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    /// Drop all entries.
    async fn clear(&self) -> Result<()>;

    /// Number of live entries in this tier.
    async fn size(&self) -> Result<usize>;

    /// Provider name for diagnostics ("moka", "redis").
    fn provider_name(&self) -> &str;
}
