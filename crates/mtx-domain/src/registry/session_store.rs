//! Session Store Provider Registry
//!
//! Auto-registration system for session store backends using linkme
//! distributed slices. Providers register a [`SessionStoreEntry`] and are
//! discovered at runtime; the store factory is the only caller. The
//! resolver validates the configuration against the chosen backend's
//! requirements before any construction happens, so providers can assume
//! a well-formed config.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ports::SessionStore;

/// Configuration for session store provider creation.
///
/// Contains all options a store backend might need. Providers use what they
/// need and ignore the rest.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Provider name ("memory", "redis").
    pub provider: String,
    /// Connection URL (distributed backends).
    pub url: Option<String>,
    /// Prefix for all keys written by this instance.
    pub key_prefix: String,
    /// Default session TTL in seconds; `0` disables expiry.
    pub default_ttl_secs: u64,
    /// Default lock auto-release timeout in milliseconds.
    pub lock_timeout_ms: u64,
}

impl SessionStoreConfig {
    /// Config for the named provider with standard defaults.
    #[must_use]
    pub fn new<S: Into<String>>(provider: S) -> Self {
        Self {
            provider: provider.into(),
            url: None,
            key_prefix: "mcp:".to_owned(),
            default_ttl_secs: 3_600,
            lock_timeout_ms: 30_000,
        }
    }

    /// Set the connection URL.
    #[must_use]
    pub fn with_url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the key prefix.
    #[must_use]
    pub fn with_key_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the default session TTL in seconds.
    #[must_use]
    pub fn with_default_ttl_secs(mut self, secs: u64) -> Self {
        self.default_ttl_secs = secs;
        self
    }

    /// Set the lock auto-release timeout in milliseconds.
    #[must_use]
    pub fn with_lock_timeout_ms(mut self, ms: u64) -> Self {
        self.lock_timeout_ms = ms;
        self
    }

    /// Check the invariants every backend relies on.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` when the key prefix is empty (instances
    /// sharing a backend would collide), the lock timeout is zero (locks
    /// would expire immediately), or the entry's declared requirements are
    /// not met — currently a URL for distributed backends.
    pub fn validate_for(&self, entry: &SessionStoreEntry) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(config_error("key_prefix must not be empty"));
        }
        if self.lock_timeout_ms == 0 {
            return Err(config_error("lock_timeout_ms must be greater than zero"));
        }
        if entry.requires_url && self.url.is_none() {
            return Err(config_error(format!(
                "provider '{}' requires a connection URL",
                entry.name
            )));
        }
        Ok(())
    }
}

/// One registered session store backend.
pub struct SessionStoreEntry {
    /// Unique provider name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Whether the backend needs a connection URL to be constructed.
    pub requires_url: bool,
    /// Constructor; receives a config already validated by the resolver.
    pub build: fn(&SessionStoreConfig) -> std::result::Result<Arc<dyn SessionStore>, String>,
}

/// Distributed slice collecting session store registrations.
#[linkme::distributed_slice]
pub static SESSION_STORE_PROVIDERS: [SessionStoreEntry] = [..];

/// Resolve and construct the backend named in `config`.
///
/// # Errors
///
/// Returns `ConfigInvalid` when the name is unknown, the config fails the
/// backend's validation, or the constructor fails.
pub fn resolve_session_store(config: &SessionStoreConfig) -> Result<Arc<dyn SessionStore>> {
    let Some(entry) = SESSION_STORE_PROVIDERS
        .iter()
        .find(|entry| entry.name == config.provider)
    else {
        let registered: Vec<&str> = SESSION_STORE_PROVIDERS.iter().map(|e| e.name).collect();
        return Err(config_error(format!(
            "unknown session store provider '{}'; registered: {registered:?}",
            config.provider
        )));
    };
    config.validate_for(entry)?;
    (entry.build)(config).map_err(config_error)
}

/// Registered backends as `(name, description)` pairs, for diagnostics.
#[must_use]
pub fn list_session_store_providers() -> Vec<(&'static str, &'static str)> {
    SESSION_STORE_PROVIDERS
        .iter()
        .map(|entry| (entry.name, entry.description))
        .collect()
}

fn config_error<S: Into<String>>(message: S) -> Error {
    Error::ConfigInvalid {
        key: "session_store".to_owned(),
        message: message.into(),
    }
}
