#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

use std::time::{Duration, Instant};

use mtx_domain::session::Session;
use mtx_infrastructure::config::AppConfig;
use mtx_infrastructure::factory::{create_session_store, StoreFactoryOptions};
use mtx_infrastructure::AppContext;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Nothing listens on port 1; the probe must fail fast.
const UNREACHABLE_URL: &str = "redis://127.0.0.1:1";

fn options() -> StoreFactoryOptions {
    StoreFactoryOptions {
        url: None,
        prefix: "test:".to_owned(),
        default_ttl_secs: 3_600,
        lock_timeout_ms: 30_000,
        prefer_memory: false,
        verbose: false,
        probe_timeout: Some(Duration::from_millis(500)),
    }
}

#[tokio::test]
async fn no_url_selects_the_memory_store() {
    let store = create_session_store(&options()).await;
    assert_eq!(store.backend_name(), "memory");
}

#[tokio::test]
async fn prefer_memory_short_circuits_even_with_a_url() {
    let store = create_session_store(&StoreFactoryOptions {
        url: Some(UNREACHABLE_URL.to_owned()),
        prefer_memory: true,
        ..options()
    })
    .await;
    assert_eq!(store.backend_name(), "memory");
}

#[tokio::test]
async fn unreachable_backend_falls_back_within_the_probe_budget() -> TestResult {
    let started = Instant::now();
    let store = create_session_store(&StoreFactoryOptions {
        url: Some(UNREACHABLE_URL.to_owned()),
        probe_timeout: Some(Duration::from_secs(1)),
        ..options()
    })
    .await;

    assert_eq!(store.backend_name(), "memory");
    assert!(started.elapsed() < Duration::from_secs(3));

    // The fallback store is fully functional.
    store.set_session("sess", &Session::new("sess"), 0).await?;
    let ids = store.session_ids().await?;
    assert_eq!(ids, vec!["sess"]);
    Ok(())
}

#[tokio::test]
async fn bootstrap_falls_back_silently_by_default() -> TestResult {
    let config = AppConfig {
        store_url: Some(UNREACHABLE_URL.to_owned()),
        ..AppConfig::default()
    };
    let context = AppContext::bootstrap(config).await?;
    assert_eq!(context.store.backend_name(), "memory");
    context.dispose().await?;
    Ok(())
}

#[tokio::test]
async fn bootstrap_fails_when_fallback_is_disabled() {
    let config = AppConfig {
        store_url: Some(UNREACHABLE_URL.to_owned()),
        allow_fallback: false,
        ..AppConfig::default()
    };
    let err = AppContext::bootstrap(config).await.unwrap_err();
    assert!(err.to_string().contains("unreachable"));
}

#[tokio::test]
async fn force_memory_overrides_a_disabled_fallback() -> TestResult {
    let config = AppConfig {
        store_url: Some(UNREACHABLE_URL.to_owned()),
        allow_fallback: false,
        force_memory: true,
        ..AppConfig::default()
    };
    let context = AppContext::bootstrap(config).await?;
    assert_eq!(context.store.backend_name(), "memory");
    context.dispose().await?;
    Ok(())
}
