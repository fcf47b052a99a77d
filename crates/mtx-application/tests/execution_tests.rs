#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use mtx_application::execution::{ExecuteOptions, ExecutionConfig, ToolExecutionService};
use mtx_application::registry::ToolRegistry;
use mtx_application::result_cache::{ResultCache, ResultCacheConfig};
use mtx_domain::ports::SessionStore;
use mtx_domain::registry::session_store::SessionStoreConfig;
use mtx_domain::tool::{
    HandlerOutcome, ParamKind, ParameterSpec, ToolDescriptor, ToolHandler,
};
use mtx_providers::{InMemorySessionStore, MokaCacheProvider};

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn memory_store() -> Arc<dyn SessionStore> {
    Arc::new(InMemorySessionStore::new(
        SessionStoreConfig::new("memory").with_key_prefix("test:"),
    ))
}

fn memory_cache() -> Arc<ResultCache> {
    Arc::new(ResultCache::new(
        Arc::new(MokaCacheProvider::new(1_024)),
        None,
        ResultCacheConfig {
            key_prefix: "test:".to_owned(),
            default_ttl_secs: 300,
        },
    ))
}

fn service_over(store: Arc<dyn SessionStore>) -> Arc<ToolExecutionService> {
    Arc::new(ToolExecutionService::new(
        Arc::new(ToolRegistry::new()),
        store,
        memory_cache(),
        ExecutionConfig::default(),
    ))
}

fn test_service() -> Arc<ToolExecutionService> {
    service_over(memory_store())
}

fn echo_handler() -> ToolHandler {
    Arc::new(|params, _state| {
        Box::pin(async move {
            let msg = params
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_uppercase();
            Ok(HandlerOutcome::ok(json!(msg)))
        })
    })
}

fn echo_descriptor() -> ToolDescriptor {
    ToolDescriptor::new("echo", "Upper-cases a message")
        .with_parameters(vec![ParameterSpec::required("msg", ParamKind::String)])
}

fn counter_handler() -> ToolHandler {
    Arc::new(|_params, state| {
        Box::pin(async move {
            let n = state.and_then(|s| s["n"].as_i64()).unwrap_or(0) + 1;
            Ok(HandlerOutcome::ok(json!(n)).with_state(json!({"n": n})))
        })
    })
}

fn sleepy_handler(sleep: Duration) -> ToolHandler {
    Arc::new(move |_params, _state| {
        Box::pin(async move {
            tokio::time::sleep(sleep).await;
            Ok(HandlerOutcome::ok(json!("done")))
        })
    })
}

#[tokio::test]
async fn happy_path_single_call() {
    let service = test_service();
    service
        .register_stateful_tool(echo_descriptor(), echo_handler())
        .expect("register echo");

    let envelope = service
        .execute_tool("echo", params(json!({"msg": "hi"})), Some("sess-1".to_owned()), true)
        .await;

    assert_eq!(envelope.data, Some(json!("HI")));
    assert!(envelope.status.success);
    assert_eq!(envelope.status.code, 200);
    assert_eq!(envelope.metadata.tool, "echo");
    assert!(envelope.metadata.execution_time_ms > 0);
    assert_eq!(
        envelope.context.as_ref().and_then(|c| c.session_id.as_deref()),
        Some("sess-1")
    );
    assert!(!envelope.metadata.from_cache);
}

#[tokio::test]
async fn second_identical_call_is_served_from_cache() {
    let service = test_service();
    service
        .register_stateful_tool(echo_descriptor(), echo_handler())
        .expect("register echo");

    let first = service
        .execute_tool("echo", params(json!({"msg": "hi"})), Some("sess-1".to_owned()), true)
        .await;
    let second = service
        .execute_tool("echo", params(json!({"msg": "hi"})), Some("sess-1".to_owned()), true)
        .await;

    assert!(second.metadata.from_cache);
    assert_eq!(second.metadata.execution_time_ms, 0);
    assert_eq!(second.data, first.data);
    assert_eq!(second.status, first.status);
    assert_eq!(second.context, first.context);
}

#[tokio::test]
async fn cache_keys_are_canonical_across_param_order() {
    let service = test_service();
    let descriptor = ToolDescriptor::new("pair", "Echoes a pair").with_parameters(vec![
        ParameterSpec::required("a", ParamKind::Integer),
        ParameterSpec::required("b", ParamKind::Integer),
    ]);
    let handler: ToolHandler = Arc::new(|params, _state| {
        Box::pin(async move { Ok(HandlerOutcome::ok(Value::Object(params))) })
    });
    service
        .register_stateful_tool(descriptor, handler)
        .expect("register pair");

    service
        .execute_tool("pair", params(json!({"a": 1, "b": 2})), Some("s".to_owned()), true)
        .await;
    let reordered = service
        .execute_tool("pair", params(json!({"b": 2, "a": 1})), Some("s".to_owned()), true)
        .await;

    assert!(reordered.metadata.from_cache);
}

#[tokio::test]
async fn session_continuity_accumulates_handler_state() {
    let service = test_service();
    service
        .register_stateful_tool(
            ToolDescriptor::new("counter", "Counts calls per session"),
            counter_handler(),
        )
        .expect("register counter");

    let first = service
        .execute_tool("counter", Map::new(), Some("s".to_owned()), false)
        .await;
    let second = service
        .execute_tool("counter", Map::new(), Some("s".to_owned()), false)
        .await;
    let other = service
        .execute_tool("counter", Map::new(), Some("t".to_owned()), false)
        .await;

    assert_eq!(first.data, Some(json!(1)));
    assert_eq!(second.data, Some(json!(2)));
    assert_eq!(other.data, Some(json!(1)));
}

#[tokio::test]
async fn schema_violation_yields_422_envelope() {
    let service = test_service();
    let descriptor = ToolDescriptor::new("greet", "Greets by name")
        .with_parameters(vec![ParameterSpec::required("name", ParamKind::String)]);
    service
        .register_stateful_tool(descriptor, echo_handler())
        .expect("register greet");

    let envelope = service
        .execute_tool("greet", params(json!({"name": 42})), Some("s".to_owned()), true)
        .await;

    assert!(envelope.data.is_none());
    assert!(!envelope.status.success);
    assert_eq!(envelope.status.code, 422);
    assert_eq!(
        envelope.status.message.as_deref(),
        Some("SchemaViolation: name must be string")
    );
}

#[tokio::test]
async fn handler_soft_error_attaches_error_data() {
    let service = test_service();
    let flaky: ToolHandler = Arc::new(|_params, _state| {
        Box::pin(async {
            Ok(HandlerOutcome::soft_error(json!({
                "message": "upstream unavailable",
                "code": "E_UPSTREAM",
            })))
        })
    });
    service
        .register_stateful_tool(ToolDescriptor::new("flaky", "Always reports an error"), flaky)
        .expect("register flaky");

    let envelope = service
        .execute_tool("flaky", Map::new(), Some("s".to_owned()), true)
        .await;

    assert!(!envelope.status.success);
    assert_eq!(envelope.status.code, 500);
    assert_eq!(
        envelope.status.message.as_deref(),
        Some("HandlerError: upstream unavailable")
    );
    // The handler explicitly attached error data; it rides in `data`.
    assert_eq!(
        envelope.data,
        Some(json!({"message": "upstream unavailable", "code": "E_UPSTREAM"}))
    );

    let context = service.get_context("s").await;
    let data = context.data.expect("context data");
    assert_eq!(data["machineState"], json!("failed"));
    assert_eq!(
        data["context"]["error"]["message"],
        json!("upstream unavailable")
    );
    // Failed runs are not cached and never enter history.
    assert_eq!(data["context"]["history"].as_array().map(Vec::len), Some(0));
    let retry = service
        .execute_tool("flaky", Map::new(), Some("s".to_owned()), true)
        .await;
    assert!(!retry.metadata.from_cache);
}

#[tokio::test]
async fn unknown_tool_yields_404_envelope() {
    let service = test_service();
    let envelope = service
        .execute_tool("nope", Map::new(), Some("s".to_owned()), true)
        .await;

    assert!(!envelope.status.success);
    assert_eq!(envelope.status.code, 404);
    assert_eq!(
        envelope.status.message.as_deref(),
        Some("NotFound: tool nope")
    );

    // The selection was recorded; the machine observed the failed run.
    let context = service.get_context("s").await;
    assert_eq!(context.data.as_ref().unwrap()["machineState"], json!("failed"));
    assert_eq!(
        context.data.as_ref().unwrap()["context"]["toolName"],
        json!("nope")
    );
    assert_eq!(
        context.data.as_ref().unwrap()["context"]["selectedTool"],
        Value::Null
    );
}

#[tokio::test]
async fn missing_session_id_is_generated_and_echoed() {
    let service = test_service();
    service
        .register_stateful_tool(echo_descriptor(), echo_handler())
        .expect("register echo");

    let envelope = service
        .execute_tool("echo", params(json!({"msg": "x"})), None, true)
        .await;

    let session_id = envelope
        .context
        .as_ref()
        .and_then(|c| c.session_id.clone())
        .expect("generated session id");
    assert!(!session_id.is_empty());

    let ids = service.session_ids().await.expect("session ids");
    assert!(ids.contains(&session_id));
}

#[tokio::test]
async fn step_wise_select_set_execute_flow() {
    let service = test_service();
    service
        .register_stateful_tool(echo_descriptor(), echo_handler())
        .expect("register echo");

    let selected = service.select_tool("s", "echo").await;
    assert!(selected.status.success);
    assert_eq!(selected.data.as_ref().unwrap()["machineState"], json!("toolSelected"));

    let set = service.set_parameters("s", params(json!({"msg": "hey"}))).await;
    assert!(set.status.success);
    assert_eq!(set.data.as_ref().unwrap()["machineState"], json!("parametersSet"));

    let executed = service.execute("s", ExecuteOptions::default()).await;
    assert!(executed.status.success);
    assert_eq!(executed.data, Some(json!("HEY")));
}

#[tokio::test]
async fn execute_without_parameters_is_invalid_state() {
    let service = test_service();
    service
        .register_stateful_tool(echo_descriptor(), echo_handler())
        .expect("register echo");

    service.select_tool("s", "echo").await;
    let envelope = service.execute("s", ExecuteOptions::default()).await;

    assert!(!envelope.status.success);
    assert_eq!(envelope.status.code, 409);
    assert!(envelope
        .status
        .message
        .as_deref()
        .unwrap()
        .starts_with("InvalidState"));
}

#[tokio::test]
async fn set_parameters_rejects_before_selection() {
    let service = test_service();
    let envelope = service.set_parameters("s", Map::new()).await;
    assert_eq!(envelope.status.code, 409);
}

#[tokio::test]
async fn handler_timeout_yields_504_envelope() {
    let service = test_service();
    service
        .register_stateful_tool(
            ToolDescriptor::new("slow", "Sleeps"),
            sleepy_handler(Duration::from_millis(400)),
        )
        .expect("register slow");

    service.select_tool("s", "slow").await;
    service.set_parameters("s", Map::new()).await;
    let envelope = service
        .execute(
            "s",
            ExecuteOptions {
                operation_timeout: Some(Duration::from_millis(100)),
            },
        )
        .await;

    assert!(!envelope.status.success);
    assert_eq!(envelope.status.code, 504);
    assert!(envelope
        .status
        .message
        .as_deref()
        .unwrap()
        .starts_with("HandlerTimeout"));
}

#[tokio::test]
async fn cancellation_discards_the_late_result_and_skips_the_cache() {
    let service = test_service();
    service
        .register_stateful_tool(
            ToolDescriptor::new("napper", "Sleeps then returns"),
            sleepy_handler(Duration::from_millis(200)),
        )
        .expect("register napper");

    let runner = Arc::clone(&service);
    let run = tokio::spawn(async move {
        runner
            .execute_tool("napper", Map::new(), Some("x".to_owned()), true)
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let cancelled = service.cancel("x").await;
    assert!(cancelled.status.success);

    let envelope = run.await.expect("join");
    assert!(!envelope.status.success);
    assert_eq!(envelope.status.code, 409);

    let context = service.get_context("x").await;
    assert_eq!(
        context.data.as_ref().unwrap()["machineState"],
        json!("cancelled")
    );

    // Give the abandoned handler time to finish; its result must not land.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let retry = service
        .execute_tool("napper", Map::new(), Some("x".to_owned()), true)
        .await;
    assert!(!retry.metadata.from_cache);
    assert_eq!(retry.data, Some(json!("done")));
}

#[tokio::test]
async fn lock_contention_returns_409_and_succeeds_on_retry() {
    let store = memory_store();
    let first = service_over(Arc::clone(&store));
    let second = service_over(Arc::clone(&store));
    for service in [&first, &second] {
        service
            .register_stateful_tool(
                ToolDescriptor::new("napper", "Sleeps then returns"),
                sleepy_handler(Duration::from_millis(300)),
            )
            .expect("register napper");
    }

    let holder = Arc::clone(&first);
    let run = tokio::spawn(async move {
        holder
            .execute_tool("napper", Map::new(), Some("x".to_owned()), false)
            .await
    });

    tokio::time::sleep(Duration::from_millis(80)).await;
    let contended = second
        .execute_tool("napper", Map::new(), Some("x".to_owned()), false)
        .await;
    assert!(!contended.status.success);
    assert_eq!(contended.status.code, 409);
    assert!(contended
        .status
        .message
        .as_deref()
        .unwrap()
        .starts_with("LockUnavailable"));

    let held = run.await.expect("join");
    assert!(held.status.success);

    let retry = second
        .execute_tool("napper", Map::new(), Some("x".to_owned()), false)
        .await;
    assert!(retry.status.success);
}

#[tokio::test]
async fn reset_is_idempotent_and_keeps_history() {
    let service = test_service();
    service
        .register_stateful_tool(echo_descriptor(), echo_handler())
        .expect("register echo");

    service
        .execute_tool("echo", params(json!({"msg": "hi"})), Some("s".to_owned()), false)
        .await;

    service.reset("s").await;
    let again = service.reset("s").await;
    assert!(again.status.success);

    let context = service.get_context("s").await;
    let data = context.data.expect("context data");
    assert_eq!(data["machineState"], json!("idle"));
    assert_eq!(data["context"]["toolName"], Value::Null);
    assert_eq!(data["context"]["parameters"], Value::Null);
    assert_eq!(data["context"]["history"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn clear_session_drops_state_and_cached_results() {
    let service = test_service();
    service
        .register_stateful_tool(echo_descriptor(), echo_handler())
        .expect("register echo");

    service
        .execute_tool("echo", params(json!({"msg": "hi"})), Some("s".to_owned()), true)
        .await;

    let cleared = service.clear_session("s").await;
    assert!(cleared.status.success);

    let context = service.get_context("s").await;
    assert_eq!(context.status.code, 404);

    // The namespace was invalidated, so the identical call misses the cache.
    let retry = service
        .execute_tool("echo", params(json!({"msg": "hi"})), Some("s".to_owned()), true)
        .await;
    assert!(!retry.metadata.from_cache);
}

#[tokio::test]
async fn dispose_stops_further_operations() {
    let service = test_service();
    service
        .register_stateful_tool(echo_descriptor(), echo_handler())
        .expect("register echo");

    service.dispose().await.expect("dispose");
    let envelope = service
        .execute_tool("echo", params(json!({"msg": "hi"})), Some("s".to_owned()), true)
        .await;
    assert_eq!(envelope.status.code, 410);
}

#[tokio::test]
async fn storage_failure_surfaces_as_503_envelope() {
    use async_trait::async_trait;
    use mtx_domain::error::{Error, Result};
    use mtx_domain::ports::LockToken;
    use mtx_domain::session::Session;

    #[derive(Debug)]
    struct BrokenStore {
        inner: InMemorySessionStore,
    }

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn get_session(&self, id: &str) -> Result<Option<Session>> {
            self.inner.get_session(id).await
        }
        async fn set_session(&self, _id: &str, _session: &Session, _ttl: u64) -> Result<()> {
            Err(Error::storage("connection refused"))
        }
        async fn clear_session(&self, id: &str) -> Result<()> {
            self.inner.clear_session(id).await
        }
        async fn session_ids(&self) -> Result<Vec<String>> {
            self.inner.session_ids().await
        }
        async fn extend_session_ttl(&self, id: &str, ttl: u64) -> Result<bool> {
            self.inner.extend_session_ttl(id, ttl).await
        }
        async fn get_session_ttl(&self, id: &str) -> Result<Option<u64>> {
            self.inner.get_session_ttl(id).await
        }
        async fn acquire_lock(
            &self,
            id: &str,
            timeout: Option<Duration>,
        ) -> Result<Option<LockToken>> {
            self.inner.acquire_lock(id, timeout).await
        }
        async fn release_lock(&self, id: &str, token: &LockToken) -> Result<bool> {
            self.inner.release_lock(id, token).await
        }
        async fn create_session_if_absent(&self, id: &str, init: Session) -> Result<Session> {
            self.inner.create_session_if_absent(id, init).await
        }
        async fn disconnect(&self) -> Result<()> {
            self.inner.disconnect().await
        }
        fn backend_name(&self) -> &'static str {
            "broken"
        }
    }

    let service = service_over(Arc::new(BrokenStore {
        inner: InMemorySessionStore::new(SessionStoreConfig::new("memory")),
    }));
    service
        .register_stateful_tool(echo_descriptor(), echo_handler())
        .expect("register echo");

    let envelope = service
        .execute_tool("echo", params(json!({"msg": "hi"})), Some("s".to_owned()), true)
        .await;
    assert!(!envelope.status.success);
    assert_eq!(envelope.status.code, 503);
}
