//! Store factory.
//!
//! The only code that picks a session store variant. Probes the distributed
//! backend with a bounded timeout and falls back to the in-memory store;
//! backend unavailability never raises, the fallback is silent apart from
//! an informational log when verbose.

use std::sync::Arc;
use std::time::Duration;

use mtx_application::result_cache::{ResultCache, ResultCacheConfig};
use mtx_domain::ports::SessionStore;
use mtx_domain::registry::session_store::{resolve_session_store, SessionStoreConfig};
use mtx_providers::{InMemorySessionStore, MokaCacheProvider, RedisCacheProvider, RedisSessionStore};

/// Bounded backend probe budget.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Local cache tier capacity, in entries.
const LOCAL_CACHE_ENTRIES: u64 = 1_024;

/// Factory inputs.
#[derive(Debug, Clone)]
pub struct StoreFactoryOptions {
    /// Distributed backend URL; `None` selects the in-memory store.
    pub url: Option<String>,
    /// Key prefix for sessions, locks and cache entries.
    pub prefix: String,
    /// Default session TTL in seconds.
    pub default_ttl_secs: u64,
    /// Lock record expiry in milliseconds.
    pub lock_timeout_ms: u64,
    /// Skip the probe and use the in-memory store.
    pub prefer_memory: bool,
    /// Log the fallback decision.
    pub verbose: bool,
    /// Probe budget override.
    pub probe_timeout: Option<Duration>,
}

impl Default for StoreFactoryOptions {
    fn default() -> Self {
        Self {
            url: None,
            prefix: "mcp:".to_owned(),
            default_ttl_secs: 3_600,
            lock_timeout_ms: 30_000,
            prefer_memory: false,
            verbose: false,
            probe_timeout: None,
        }
    }
}

impl StoreFactoryOptions {
    fn store_config(&self, provider: &str) -> SessionStoreConfig {
        let mut config = SessionStoreConfig::new(provider)
            .with_key_prefix(self.prefix.clone())
            .with_default_ttl_secs(self.default_ttl_secs)
            .with_lock_timeout_ms(self.lock_timeout_ms);
        if let Some(url) = &self.url {
            config = config.with_url(url.clone());
        }
        config
    }
}

/// Select and construct the session store.
///
/// 1. `prefer_memory` short-circuits to the in-memory store.
/// 2. No URL: in-memory store.
/// 3. Probe the backend within the bounded timeout.
/// 4. Reachable: distributed store; otherwise log and fall back.
pub async fn create_session_store(options: &StoreFactoryOptions) -> Arc<dyn SessionStore> {
    if options.prefer_memory {
        return memory_store(options);
    }
    let Some(url) = options.url.clone() else {
        return memory_store(options);
    };

    let timeout = options.probe_timeout.unwrap_or(DEFAULT_PROBE_TIMEOUT);
    if !RedisSessionStore::is_available(&url, timeout).await {
        if options.verbose {
            tracing::info!(url, "session store backend unreachable; using in-memory store");
        }
        return memory_store(options);
    }

    match resolve_session_store(&options.store_config("redis")) {
        Ok(store) => {
            tracing::debug!(url, "distributed session store selected");
            store
        }
        Err(e) => {
            tracing::warn!(url, error = %e, "distributed store construction failed; using in-memory store");
            memory_store(options)
        }
    }
}

/// Construct the two-tier result cache against the same backend the
/// session store selected. A memory-backed store gets a local-only cache.
pub fn create_result_cache(
    options: &StoreFactoryOptions,
    store: &Arc<dyn SessionStore>,
) -> Arc<ResultCache> {
    let local = Arc::new(MokaCacheProvider::new(LOCAL_CACHE_ENTRIES));
    let distributed: Option<Arc<dyn mtx_domain::ports::CacheProvider>> =
        match (&options.url, store.backend_name()) {
            (Some(url), "redis") => {
                let scope = format!("{}cache:", options.prefix);
                match RedisCacheProvider::new(url, scope) {
                    Ok(provider) => Some(Arc::new(provider)),
                    Err(e) => {
                        tracing::warn!(error = %e, "distributed cache tier unavailable; local tier only");
                        None
                    }
                }
            }
            _ => None,
        };

    Arc::new(ResultCache::new(
        local,
        distributed,
        ResultCacheConfig {
            key_prefix: options.prefix.clone(),
            default_ttl_secs: 300,
        },
    ))
}

fn memory_store(options: &StoreFactoryOptions) -> Arc<dyn SessionStore> {
    // The registry resolves "memory" as long as the providers crate is
    // linked; fall back to direct construction if it is not.
    resolve_session_store(&options.store_config("memory")).unwrap_or_else(|_| {
        Arc::new(InMemorySessionStore::new(options.store_config("memory")))
    })
}
