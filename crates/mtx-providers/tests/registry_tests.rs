#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs, unused_imports)]

use mtx_domain::registry::session_store::{
    list_session_store_providers, resolve_session_store, SessionStoreConfig,
};
// Force the linker to pull in mtx-providers' object code so its
// `#[linkme::distributed_slice]` registrations are present in this
// test binary (nothing else in this file references the crate).
use mtx_providers::{InMemorySessionStore as _, RedisSessionStore as _};

#[test]
fn both_backends_are_registered() {
    let providers = list_session_store_providers();
    let names: Vec<&str> = providers.iter().map(|(name, _)| *name).collect();
    assert!(names.contains(&"memory"));
    assert!(names.contains(&"redis"));
}

#[tokio::test]
async fn memory_backend_resolves_without_a_url() {
    let store = resolve_session_store(&SessionStoreConfig::new("memory")).expect("resolve memory");
    assert_eq!(store.backend_name(), "memory");
}

#[tokio::test]
async fn redis_backend_requires_a_url() {
    let err = resolve_session_store(&SessionStoreConfig::new("redis")).unwrap_err();
    assert!(err.to_string().contains("requires a connection URL"));

    let store = resolve_session_store(
        &SessionStoreConfig::new("redis").with_url("redis://127.0.0.1:6379"),
    )
    .expect("resolve redis");
    assert_eq!(store.backend_name(), "redis");
}

#[test]
fn unknown_provider_lists_the_registered_ones() {
    let err = resolve_session_store(&SessionStoreConfig::new("etcd")).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("unknown session store provider 'etcd'"));
    assert!(message.contains("memory"));
}

#[test]
fn empty_key_prefix_is_rejected() {
    let err = resolve_session_store(&SessionStoreConfig::new("memory").with_key_prefix(""))
        .unwrap_err();
    assert!(err.to_string().contains("key_prefix"));
}

#[test]
fn zero_lock_timeout_is_rejected() {
    let err = resolve_session_store(&SessionStoreConfig::new("memory").with_lock_timeout_ms(0))
        .unwrap_err();
    assert!(err.to_string().contains("lock_timeout_ms"));
}
