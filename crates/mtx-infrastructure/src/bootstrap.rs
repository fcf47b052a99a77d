//! Application bootstrap.
//!
//! Builds the process-wide `AppContext`: store, cache, registry, execution
//! service and discovery, in dependency order. A constructed context is the
//! readiness handle — nothing here may be used before `bootstrap` returns,
//! and `dispose` ends the lifecycle.

use std::sync::Arc;
use std::time::Duration;

use mtx_application::discovery::ToolDiscovery;
use mtx_application::execution::{ExecutionConfig, ToolExecutionService};
use mtx_application::registry::ToolRegistry;
use mtx_application::result_cache::ResultCache;
use mtx_domain::error::{Error, Result};
use mtx_domain::ports::SessionStore;
use mtx_providers::RedisSessionStore;

use crate::config::AppConfig;
use crate::factory::{
    create_result_cache, create_session_store, StoreFactoryOptions, DEFAULT_PROBE_TIMEOUT,
};

/// Process-wide application context with a `bootstrap`/`dispose` lifecycle.
pub struct AppContext {
    /// Resolved configuration.
    pub config: Arc<AppConfig>,
    /// Selected session store.
    pub store: Arc<dyn SessionStore>,
    /// Two-tier result cache.
    pub cache: Arc<ResultCache>,
    /// Registered tool catalog.
    pub registry: Arc<ToolRegistry>,
    /// Tool execution service.
    pub service: Arc<ToolExecutionService>,
    /// Discovery surface.
    pub discovery: Arc<ToolDiscovery>,
}

impl AppContext {
    /// Assemble the context: probe and pick the store, build the cache
    /// against the same backend, wire the execution service over both.
    ///
    /// # Errors
    ///
    /// Fails only when a store URL is configured, the backend cannot be
    /// probed, the operator disabled the memory fallback, and
    /// `FORCE_MEMORY_SESSION` is unset — the documented fatal bootstrap
    /// condition.
    pub async fn bootstrap(config: AppConfig) -> Result<Self> {
        if let Some(url) = &config.store_url {
            if !config.force_memory && !config.allow_fallback {
                let reachable = RedisSessionStore::is_available(url, DEFAULT_PROBE_TIMEOUT).await;
                if !reachable {
                    return Err(Error::ConfigInvalid {
                        key: "store_url".to_owned(),
                        message: format!(
                            "backend {url} is unreachable and the memory fallback is disabled"
                        ),
                    });
                }
            }
        }

        let options = StoreFactoryOptions {
            url: config.store_url.clone(),
            prefix: config.store_prefix.clone(),
            default_ttl_secs: config.default_ttl_secs,
            lock_timeout_ms: config.lock_timeout_ms,
            prefer_memory: config.force_memory,
            verbose: config.verbose,
            probe_timeout: None,
        };
        let store = create_session_store(&options).await;
        let cache = create_result_cache(&options, &store);
        let registry = Arc::new(ToolRegistry::new());
        let service = Arc::new(ToolExecutionService::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            Arc::clone(&cache),
            ExecutionConfig {
                session_ttl_secs: config.default_ttl_secs,
                cache_ttl_secs: 300,
                lock_timeout: Some(Duration::from_millis(config.lock_timeout_ms)),
                operation_timeout: Duration::from_secs(30),
                history_limit: mtx_domain::machine::DEFAULT_HISTORY_LIMIT,
            },
        ));
        let discovery = Arc::new(ToolDiscovery::new(Arc::clone(&registry)));

        tracing::info!(
            backend = store.backend_name(),
            prefix = config.store_prefix,
            "tool execution core ready"
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            cache,
            registry,
            service,
            discovery,
        })
    }

    /// Stop in-process work and disconnect the store.
    ///
    /// # Errors
    ///
    /// Propagates store disconnect failures.
    pub async fn dispose(&self) -> Result<()> {
        self.service.dispose().await
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("backend", &self.store.backend_name())
            .field("tools", &self.registry.len())
            .finish()
    }
}
