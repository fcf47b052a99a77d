//! Application configuration.
//!
//! All knobs arrive through environment variables; there is no config file.
//! `from_env` reads the process environment, `from_lookup` takes any
//! resolver so tests never mutate global state.

use mtx_domain::error::{Error, Result};
use mtx_domain::ports::normalize_ttl_secs;

/// Transport port.
pub const ENV_PORT: &str = "PORT";
/// "true" to serve over stdio instead of HTTP.
pub const ENV_STDIO_TRANSPORT: &str = "STDIO_TRANSPORT";
/// Distributed backend URL (preferred name).
pub const ENV_REDIS_URL: &str = "REDIS_URL";
/// Distributed backend URL (generic alias, lower priority).
pub const ENV_STORE_URL: &str = "STORE_URL";
/// "true" forces the in-memory store regardless of URL.
pub const ENV_FORCE_MEMORY: &str = "FORCE_MEMORY_SESSION";
/// "true" enables informational logs.
pub const ENV_VERBOSE: &str = "VERBOSE";
/// Prefix for all keys in the distributed store.
pub const ENV_STORE_PREFIX: &str = "STORE_PREFIX";
/// Default session TTL in seconds.
pub const ENV_DEFAULT_TTL: &str = "DEFAULT_TTL";
/// Default lock expiry in milliseconds.
pub const ENV_LOCK_TIMEOUT: &str = "LOCK_TIMEOUT";
/// "false" disables the silent memory fallback when the backend is down.
pub const ENV_STORE_FALLBACK: &str = "STORE_FALLBACK";

/// Resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Transport port (HTTP transport only).
    pub port: u16,
    /// Serve over stdio instead of HTTP.
    pub stdio_transport: bool,
    /// Distributed backend URL; `None` selects the in-memory store.
    pub store_url: Option<String>,
    /// Force the in-memory store even when a URL is configured.
    pub force_memory: bool,
    /// Informational logging.
    pub verbose: bool,
    /// Key prefix shared by sessions, locks and cache entries.
    pub store_prefix: String,
    /// Default session TTL in seconds; `0` disables expiry.
    pub default_ttl_secs: u64,
    /// Lock record expiry in milliseconds.
    pub lock_timeout_ms: u64,
    /// Whether backend unavailability may fall back to memory.
    pub allow_fallback: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3_000,
            stdio_transport: false,
            store_url: None,
            force_memory: false,
            verbose: false,
            store_prefix: "mcp:".to_owned(),
            default_ttl_secs: 3_600,
            lock_timeout_ms: 30_000,
            allow_fallback: true,
        }
    }
}

impl AppConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unparsable or out-of-range values.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable resolver.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unparsable or out-of-range values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            port: parse_number(&lookup, ENV_PORT, defaults.port)?,
            stdio_transport: parse_flag(&lookup, ENV_STDIO_TRANSPORT),
            store_url: lookup(ENV_REDIS_URL)
                .or_else(|| lookup(ENV_STORE_URL))
                .filter(|url| !url.is_empty()),
            force_memory: parse_flag(&lookup, ENV_FORCE_MEMORY),
            verbose: parse_flag(&lookup, ENV_VERBOSE),
            store_prefix: lookup(ENV_STORE_PREFIX).unwrap_or(defaults.store_prefix),
            default_ttl_secs: parse_ttl(&lookup, ENV_DEFAULT_TTL, defaults.default_ttl_secs)?,
            lock_timeout_ms: parse_number(&lookup, ENV_LOCK_TIMEOUT, defaults.lock_timeout_ms)?,
            allow_fallback: lookup(ENV_STORE_FALLBACK)
                .map_or(true, |raw| !raw.eq_ignore_ascii_case("false")),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(Error::ConfigInvalid {
                key: ENV_LOCK_TIMEOUT.to_owned(),
                message: "lock timeout must be greater than zero".to_owned(),
            });
        }
        Ok(())
    }
}

fn parse_flag<F>(lookup: &F, key: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).is_some_and(|raw| raw.eq_ignore_ascii_case("true"))
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e| Error::ConfigInvalid {
            key: key.to_owned(),
            message: format!("{e}: {raw}"),
        }),
    }
}

/// TTLs may arrive negative from the environment; `0` means "no expiry"
/// and negatives are rejected.
fn parse_ttl<F>(lookup: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw: i64 = parse_number(lookup, key, 0_i64)?;
    if lookup(key).is_none() {
        return Ok(default);
    }
    normalize_ttl_secs(raw)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::collections::HashMap;

    use super::*;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |key| map.get(key).map(|v| (*v).to_owned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.port, 3_000);
        assert_eq!(config.store_prefix, "mcp:");
        assert_eq!(config.default_ttl_secs, 3_600);
        assert_eq!(config.lock_timeout_ms, 30_000);
        assert!(config.store_url.is_none());
        assert!(config.allow_fallback);
    }

    #[test]
    fn redis_url_takes_precedence_over_store_url() {
        let config = AppConfig::from_lookup(lookup_from(&[
            (ENV_REDIS_URL, "redis://a:6379"),
            (ENV_STORE_URL, "redis://b:6379"),
        ]))
        .unwrap();
        assert_eq!(config.store_url.as_deref(), Some("redis://a:6379"));
    }

    #[test]
    fn flags_parse_case_insensitively() {
        let config = AppConfig::from_lookup(lookup_from(&[
            (ENV_FORCE_MEMORY, "TRUE"),
            (ENV_VERBOSE, "true"),
            (ENV_STDIO_TRANSPORT, "True"),
        ]))
        .unwrap();
        assert!(config.force_memory);
        assert!(config.verbose);
        assert!(config.stdio_transport);
    }

    #[test]
    fn ttl_zero_is_accepted_as_no_expiry() {
        let config =
            AppConfig::from_lookup(lookup_from(&[(ENV_DEFAULT_TTL, "0")])).unwrap();
        assert_eq!(config.default_ttl_secs, 0);
    }

    #[test]
    fn negative_ttl_is_a_schema_violation() {
        let err = AppConfig::from_lookup(lookup_from(&[(ENV_DEFAULT_TTL, "-1")])).unwrap_err();
        assert_eq!(err.kind(), "SchemaViolation");
        assert_eq!(err.status_code(), 422);
    }

    #[test]
    fn zero_lock_timeout_is_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[(ENV_LOCK_TIMEOUT, "0")])).unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }

    #[test]
    fn fallback_is_disabled_only_by_explicit_false() {
        let on = AppConfig::from_lookup(lookup_from(&[(ENV_STORE_FALLBACK, "true")])).unwrap();
        assert!(on.allow_fallback);
        let off = AppConfig::from_lookup(lookup_from(&[(ENV_STORE_FALLBACK, "false")])).unwrap();
        assert!(!off.allow_fallback);
    }
}
