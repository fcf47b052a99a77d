#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

use std::time::Duration;

use mtx_domain::ports::CacheProvider;
use mtx_providers::MokaCacheProvider;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

#[tokio::test]
async fn set_then_get_within_ttl() -> TestResult {
    let cache = MokaCacheProvider::new(100);
    cache
        .set_json("k", "\"v\"", Some(Duration::from_secs(60)))
        .await?;
    assert_eq!(cache.get_json("k").await?.as_deref(), Some("\"v\""));
    Ok(())
}

#[tokio::test]
async fn expired_entry_reads_as_absent() -> TestResult {
    let cache = MokaCacheProvider::new(100);
    cache
        .set_json("k", "\"v\"", Some(Duration::from_millis(50)))
        .await?;
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(cache.get_json("k").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn entry_without_ttl_does_not_expire() -> TestResult {
    let cache = MokaCacheProvider::new(100);
    cache.set_json("k", "1", None).await?;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(cache.get_json("k").await?.as_deref(), Some("1"));
    Ok(())
}

#[tokio::test]
async fn delete_reports_prior_existence() -> TestResult {
    let cache = MokaCacheProvider::new(100);
    cache.set_json("k", "1", None).await?;
    assert!(cache.delete("k").await?);
    assert!(!cache.delete("k").await?);
    Ok(())
}

#[tokio::test]
async fn delete_prefix_scopes_to_matching_keys() -> TestResult {
    let cache = MokaCacheProvider::new(100);
    cache.set_json("mcp:cache:sess-1:a", "1", None).await?;
    cache.set_json("mcp:cache:sess-1:b", "2", None).await?;
    cache.set_json("mcp:cache:sess-2:a", "3", None).await?;

    let removed = cache.delete_prefix("mcp:cache:sess-1:").await?;
    assert_eq!(removed, 2);

    assert!(cache.get_json("mcp:cache:sess-1:a").await?.is_none());
    assert!(cache.get_json("mcp:cache:sess-1:b").await?.is_none());
    assert_eq!(
        cache.get_json("mcp:cache:sess-2:a").await?.as_deref(),
        Some("3")
    );
    Ok(())
}

#[tokio::test]
async fn clear_empties_the_tier() -> TestResult {
    let cache = MokaCacheProvider::new(100);
    cache.set_json("a", "1", None).await?;
    cache.set_json("b", "2", None).await?;
    cache.clear().await?;
    assert_eq!(cache.size().await?, 0);
    Ok(())
}
