//! Tool execution service.
//!
//! Binds registered tools to the per-session state machine and the stores.
//! Every mutating operation follows the lock discipline: acquire the
//! session lock, mutate the machine, persist the snapshot, extend the TTL,
//! release the lock — releasing on error paths too. Failures never cross
//! the core boundary as `Err`; public operations encode them into response
//! envelopes with stable status codes.
//!
//! Cancellation is cooperative. The handler future is spawned and keeps
//! running after a cancel; its late completion is discarded and never
//! cached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use mtx_domain::envelope::{ErrorOptions, SuccessOptions, ToolResponse};
use mtx_domain::error::{Error, Result};
use mtx_domain::machine::{ErrorInfo, MachineEvent, MachineState, ToolMachine};
use mtx_domain::ports::{LockToken, SessionStore};
use mtx_domain::session::Session;
use mtx_domain::tool::{HandlerOutcome, RegisteredTool};
use mtx_domain::utils::canonical::invocation_key;
use mtx_domain::utils::id;

use crate::registry::ToolRegistry;
use crate::result_cache::ResultCache;

/// Execution service tuning knobs.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Session TTL re-armed on every successful operation, in seconds.
    pub session_ttl_secs: u64,
    /// Result cache TTL for tools that declare none, in seconds.
    pub cache_ttl_secs: u64,
    /// Lock record expiry; `None` uses the store's configured default.
    pub lock_timeout: Option<Duration>,
    /// Per-handler execution budget.
    pub operation_timeout: Duration,
    /// History retention per session.
    pub history_limit: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 3_600,
            cache_ttl_secs: 300,
            lock_timeout: None,
            operation_timeout: Duration::from_secs(30),
            history_limit: mtx_domain::machine::DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Options for [`ToolExecutionService::execute`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Override of the configured handler timeout.
    pub operation_timeout: Option<Duration>,
}

enum HandlerVerdict {
    Done(HandlerOutcome),
    Failed(Error),
    TimedOut,
    Cancelled,
}

/// Stateful tool execution service over a session store and result cache.
pub struct ToolExecutionService {
    registry: Arc<ToolRegistry>,
    store: Arc<dyn SessionStore>,
    cache: Arc<ResultCache>,
    config: ExecutionConfig,
    active: DashMap<String, CancellationToken>,
    disposed: AtomicBool,
}

impl ToolExecutionService {
    /// Assemble the service over its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        store: Arc<dyn SessionStore>,
        cache: Arc<ResultCache>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            registry,
            store,
            cache,
            config,
            active: DashMap::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// The tool registry backing this service.
    #[must_use]
    pub fn registry(&self) -> Arc<ToolRegistry> {
        Arc::clone(&self.registry)
    }

    /// The result cache backing this service.
    #[must_use]
    pub fn cache(&self) -> Arc<ResultCache> {
        Arc::clone(&self.cache)
    }

    /// Register a tool and its handler. The declared schema is extended
    /// with the optional `sessionId` parameter.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` on duplicate registration.
    pub fn register_stateful_tool(
        &self,
        descriptor: mtx_domain::tool::ToolDescriptor,
        handler: mtx_domain::tool::ToolHandler,
    ) -> Result<()> {
        self.registry.register(descriptor, handler)
    }

    /// Select a tool for the session. Re-selection is allowed; a terminal
    /// or executing machine is reset first (history is kept).
    pub async fn select_tool(&self, session_id: &str, tool_name: &str) -> ToolResponse {
        let started = Instant::now();
        let outcome = self.select_tool_inner(session_id, tool_name).await;
        self.finish(outcome, tool_name, session_id, started)
    }

    /// Validate and set the parameters for the selected tool. Replaces any
    /// previous parameter map.
    pub async fn set_parameters(
        &self,
        session_id: &str,
        params: Map<String, Value>,
    ) -> ToolResponse {
        let started = Instant::now();
        let outcome = self.set_parameters_inner(session_id, params).await;
        self.finish(outcome, "set_parameters", session_id, started)
    }

    /// Dispatch the selected tool's handler. The machine must be in
    /// `parametersSet`.
    pub async fn execute(&self, session_id: &str, options: ExecuteOptions) -> ToolResponse {
        let started = Instant::now();
        match self.execute_inner(session_id, &options).await {
            Ok(envelope) => envelope,
            Err(e) => self.error_envelope(&e, "execute", session_id, started),
        }
    }

    /// One-shot invocation path used by the transport: cache consult,
    /// select → parameters → execute on miss, success envelope cached
    /// under the session namespace.
    pub async fn execute_tool(
        &self,
        tool_id: &str,
        params: Map<String, Value>,
        session_id: Option<String>,
        use_cached: bool,
    ) -> ToolResponse {
        let session_id = session_id.unwrap_or_else(id::generate_session_id);
        let started = Instant::now();
        match self
            .execute_tool_inner(tool_id, params, &session_id, use_cached)
            .await
        {
            Ok(envelope) => envelope,
            Err(e) => self.error_envelope(&e, tool_id, &session_id, started),
        }
    }

    /// Request cooperative cancellation of the session's executing run.
    pub async fn cancel(&self, session_id: &str) -> ToolResponse {
        let started = Instant::now();
        if let Some(entry) = self.active.get(session_id) {
            entry.value().cancel();
            return ToolResponse::success(
                json!({"cancelled": true}),
                "cancel",
                self.scoped(session_id, started),
            );
        }
        // No in-process run; a stray Cancel is ignored by the machine.
        let outcome = self
            .mutate_locked(session_id, |machine, _session| {
                machine.send(MachineEvent::Cancel)?;
                Ok(json!({"cancelled": machine.state() == MachineState::Cancelled}))
            })
            .await;
        self.finish(outcome, "cancel", session_id, started)
    }

    /// Reset the session's machine to `idle`, keeping history.
    pub async fn reset(&self, session_id: &str) -> ToolResponse {
        let started = Instant::now();
        let outcome = self
            .mutate_locked(session_id, |machine, _session| {
                machine.send(MachineEvent::Reset)?;
                Ok(json!({"machineState": machine.state().to_string()}))
            })
            .await;
        self.finish(outcome, "reset", session_id, started)
    }

    /// Current machine state and context for a session.
    pub async fn get_context(&self, session_id: &str) -> ToolResponse {
        let started = Instant::now();
        let outcome: Result<Value> = async {
            match self.store.get_session(session_id).await? {
                Some(session) => Ok(json!({
                    "sessionId": session.id,
                    "machineState": session.machine.value,
                    "context": serde_json::to_value(&session.machine.context)?,
                    "toolState": session.tool_state,
                })),
                None => Err(Error::not_found(format!("session {session_id}"))),
            }
        }
        .await;
        self.finish(outcome, "get_context", session_id, started)
    }

    /// Remove a session's state and its cached results.
    pub async fn clear_session(&self, session_id: &str) -> ToolResponse {
        let started = Instant::now();
        let outcome: Result<Value> = async {
            self.store.clear_session(session_id).await?;
            let invalidated = self.cache.invalidate_namespace(session_id).await?;
            Ok(json!({"cleared": true, "cacheEntriesInvalidated": invalidated}))
        }
        .await;
        self.finish(outcome, "clear_session", session_id, started)
    }

    /// Best-effort enumeration of live session ids.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn session_ids(&self) -> Result<Vec<String>> {
        self.store.session_ids().await
    }

    /// Stop in-process runs and disconnect the store. Subsequent
    /// operations fail with `StoreClosed`.
    ///
    /// # Errors
    ///
    /// Propagates store disconnect failures.
    pub async fn dispose(&self) -> Result<()> {
        self.disposed.store(true, Ordering::SeqCst);
        for entry in self.active.iter() {
            entry.value().cancel();
        }
        self.active.clear();
        self.store.disconnect().await
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn ensure_active(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::StoreClosed);
        }
        Ok(())
    }

    fn scoped(&self, session_id: &str, started: Instant) -> SuccessOptions {
        SuccessOptions {
            session_id: Some(session_id.to_owned()),
            execution_time_ms: elapsed_ms(started),
            ..SuccessOptions::default()
        }
    }

    fn finish(
        &self,
        outcome: Result<Value>,
        tool: &str,
        session_id: &str,
        started: Instant,
    ) -> ToolResponse {
        match outcome {
            Ok(data) => ToolResponse::success(data, tool, self.scoped(session_id, started)),
            Err(e) => self.error_envelope(&e, tool, session_id, started),
        }
    }

    fn error_envelope(
        &self,
        err: &Error,
        tool: &str,
        session_id: &str,
        started: Instant,
    ) -> ToolResponse {
        ToolResponse::from_error(err, tool, Some(session_id.to_owned()), elapsed_ms(started))
    }

    async fn lock(&self, session_id: &str) -> Result<LockToken> {
        match self
            .store
            .acquire_lock(session_id, self.config.lock_timeout)
            .await?
        {
            Some(token) => Ok(token),
            None => Err(Error::lock_unavailable(session_id)),
        }
    }

    async fn unlock(&self, session_id: &str, token: &LockToken) {
        match self.store.release_lock(session_id, token).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(session_id, "lock expired before release"),
            Err(e) => tracing::warn!(session_id, error = %e, "lock release failed"),
        }
    }

    async fn load(&self, session_id: &str) -> Result<(Session, ToolMachine)> {
        let session = self
            .store
            .create_session_if_absent(session_id, Session::new(session_id))
            .await?;
        let machine = ToolMachine::from_snapshot(session.machine.clone(), self.config.history_limit);
        Ok((session, machine))
    }

    async fn persist(&self, session: &mut Session, machine: &ToolMachine) -> Result<()> {
        session.machine = machine.snapshot();
        session.touch();
        self.store
            .set_session(&session.id, session, self.config.session_ttl_secs)
            .await
    }

    /// Lock → load → mutate → persist → extend TTL → unlock.
    async fn mutate_locked<F>(&self, session_id: &str, mutate: F) -> Result<Value>
    where
        F: FnOnce(&mut ToolMachine, &mut Session) -> Result<Value>,
    {
        self.ensure_active()?;
        let token = self.lock(session_id).await?;
        let outcome = async {
            let (mut session, mut machine) = self.load(session_id).await?;
            let data = mutate(&mut machine, &mut session)?;
            self.persist(&mut session, &machine).await?;
            Ok(data)
        }
        .await;
        self.unlock(session_id, &token).await;
        outcome
    }

    async fn select_tool_inner(&self, session_id: &str, tool_name: &str) -> Result<Value> {
        let resolved = self
            .registry
            .get(tool_name)
            .map(|tool| tool.descriptor.id.clone());
        let name = tool_name.to_owned();
        self.mutate_locked(session_id, move |machine, _session| {
            if !matches!(
                machine.state(),
                MachineState::Idle | MachineState::ToolSelected
            ) {
                machine.send(MachineEvent::Reset)?;
            }
            machine.send(MachineEvent::SelectTool { name, resolved })?;
            Ok(json!({"machineState": machine.state().to_string()}))
        })
        .await
    }

    async fn set_parameters_inner(
        &self,
        session_id: &str,
        params: Map<String, Value>,
    ) -> Result<Value> {
        let registry = Arc::clone(&self.registry);
        self.mutate_locked(session_id, move |machine, _session| {
            let validated = match machine
                .context()
                .selected_tool
                .as_deref()
                .and_then(|tool_id| registry.get(tool_id))
            {
                Some(tool) => tool.descriptor.validate_params(&params)?,
                // Unknown tool: no schema to enforce; the parameters are
                // stored as-is and EXECUTE will report NotFound.
                None => params,
            };
            let count = validated.len();
            machine.send(MachineEvent::SetParameters(validated))?;
            Ok(json!({
                "machineState": machine.state().to_string(),
                "parameterCount": count,
            }))
        })
        .await
    }

    async fn execute_inner(
        &self,
        session_id: &str,
        options: &ExecuteOptions,
    ) -> Result<ToolResponse> {
        self.ensure_active()?;
        let timeout = options.operation_timeout.unwrap_or(self.config.operation_timeout);
        let token = self.lock(session_id).await?;
        let outcome = async {
            let (mut session, mut machine) = self.load(session_id).await?;
            let envelope = self
                .run_execution(&mut session, &mut machine, session_id, timeout)
                .await?;
            self.store
                .extend_session_ttl(session_id, self.config.session_ttl_secs)
                .await?;
            Ok(envelope)
        }
        .await;
        self.unlock(session_id, &token).await;
        outcome
    }

    async fn execute_tool_inner(
        &self,
        tool_id: &str,
        params: Map<String, Value>,
        session_id: &str,
        use_cached: bool,
    ) -> Result<ToolResponse> {
        self.ensure_active()?;
        let cache_key = invocation_key(tool_id, &params);
        let token = self.lock(session_id).await?;
        let outcome = self
            .execute_tool_locked(tool_id, params, session_id, use_cached, &cache_key)
            .await;
        self.unlock(session_id, &token).await;
        outcome
    }

    async fn execute_tool_locked(
        &self,
        tool_id: &str,
        params: Map<String, Value>,
        session_id: &str,
        use_cached: bool,
        cache_key: &str,
    ) -> Result<ToolResponse> {
        if use_cached {
            if let Some(cached) = self.lookup_cached(cache_key, session_id).await {
                return Ok(cached);
            }
        }

        let (mut session, mut machine) = self.load(session_id).await?;
        if !matches!(
            machine.state(),
            MachineState::Idle | MachineState::ToolSelected
        ) {
            machine.send(MachineEvent::Reset)?;
        }

        let resolved = self.registry.get(tool_id);
        machine.send(MachineEvent::SelectTool {
            name: tool_id.to_owned(),
            resolved: resolved.as_ref().map(|tool| tool.descriptor.id.clone()),
        })?;
        self.persist(&mut session, &machine).await?;

        let validated = match &resolved {
            Some(tool) => match tool.descriptor.validate_params(&params) {
                Ok(validated) => validated,
                Err(e) => {
                    // The selection stands; surface the 422 to the caller.
                    return Err(e);
                }
            },
            None => params,
        };
        machine.send(MachineEvent::SetParameters(validated))?;
        self.persist(&mut session, &machine).await?;

        let envelope = self
            .run_execution(&mut session, &mut machine, session_id, self.config.operation_timeout)
            .await?;

        if envelope.status.success && use_cached {
            let ttl = resolved
                .as_ref()
                .and_then(|tool| tool.descriptor.cache_ttl_secs)
                .unwrap_or(self.config.cache_ttl_secs);
            match serde_json::to_value(&envelope) {
                Ok(value) => {
                    if let Err(e) = self
                        .cache
                        .set(cache_key, &value, Some(ttl), Some(session_id))
                        .await
                    {
                        tracing::warn!(tool_id, error = %e, "result cache write failed");
                    }
                }
                Err(e) => tracing::warn!(tool_id, error = %e, "envelope serialization failed"),
            }
        }

        self.store
            .extend_session_ttl(session_id, self.config.session_ttl_secs)
            .await?;
        Ok(envelope)
    }

    async fn lookup_cached(&self, cache_key: &str, session_id: &str) -> Option<ToolResponse> {
        match self.cache.get(cache_key, Some(session_id)).await {
            Ok(Some(value)) => match serde_json::from_value::<ToolResponse>(value) {
                Ok(envelope) => Some(envelope.into_cached()),
                Err(e) => {
                    tracing::warn!(cache_key, error = %e, "cached envelope is unreadable; evicting");
                    let _ = self.cache.delete(cache_key, Some(session_id)).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(cache_key, error = %e, "cache lookup failed");
                None
            }
        }
    }

    /// Drive `EXECUTE` and the handler to a terminal state, persisting the
    /// outcome. The session lock is held across the handler's suspension.
    async fn run_execution(
        &self,
        session: &mut Session,
        machine: &mut ToolMachine,
        session_id: &str,
        timeout: Duration,
    ) -> Result<ToolResponse> {
        machine.send(MachineEvent::Execute)?;
        self.persist(session, machine).await?;

        let resolved: Option<RegisteredTool> = machine
            .context()
            .selected_tool
            .as_deref()
            .and_then(|tool_id| self.registry.get(tool_id));
        let tool_name = machine
            .context()
            .tool_name
            .clone()
            .unwrap_or_else(|| "unknown".to_owned());

        let Some(tool) = resolved else {
            // SELECT_TOOL recorded the name but resolution failed; the run
            // terminates as a 404 without dispatching anything.
            let err = Error::not_found(format!("tool {tool_name}"));
            machine.send(MachineEvent::Error(ErrorInfo::from_error(&err)))?;
            self.persist(session, machine).await?;
            return Ok(ToolResponse::from_error(
                &err,
                &tool_name,
                Some(session_id.to_owned()),
                0,
            ));
        };

        let params = machine.context().parameters.clone().unwrap_or_default();
        let tool_state = session.tool_state_for(&tool.descriptor.id).cloned();

        let cancel = CancellationToken::new();
        self.active.insert(session_id.to_owned(), cancel.clone());
        let started = Instant::now();
        let handle = tokio::spawn((tool.handler)(params, tool_state));

        let verdict = tokio::select! {
            () = cancel.cancelled() => HandlerVerdict::Cancelled,
            joined = tokio::time::timeout(timeout, handle) => match joined {
                Err(_) => HandlerVerdict::TimedOut,
                Ok(Err(join_err)) => {
                    HandlerVerdict::Failed(Error::handler(format!("handler panicked: {join_err}")))
                }
                Ok(Ok(Ok(outcome))) => HandlerVerdict::Done(outcome),
                Ok(Ok(Err(e))) => HandlerVerdict::Failed(e),
            },
        };
        self.active.remove(session_id);
        // Sub-millisecond handlers still report a measurable duration.
        let elapsed = elapsed_ms(started).max(1);

        let envelope = match verdict {
            // A handler may report a soft failure alongside normal
            // completion; its structured payload is the one case where an
            // error envelope carries non-null data.
            HandlerVerdict::Done(outcome) if outcome.error.is_some() => {
                let detail = outcome.error.unwrap_or(Value::Null);
                let message = detail
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("handler reported an error")
                    .to_owned();
                let err = Error::handler(message);
                machine.send(MachineEvent::Error(ErrorInfo::from_error(&err)))?;
                ToolResponse::error(
                    &format!("{}: {}", err.kind(), err.detail()),
                    &tool.descriptor.name,
                    ErrorOptions {
                        code: Some(err.status_code()),
                        data: Some(detail),
                        session_id: Some(session_id.to_owned()),
                        execution_time_ms: elapsed,
                    },
                )
            }
            HandlerVerdict::Done(outcome) => {
                let envelope = ToolResponse::success(
                    outcome.result,
                    &tool.descriptor.name,
                    SuccessOptions {
                        version: Some(tool.descriptor.version.clone()),
                        session_id: Some(session_id.to_owned()),
                        related_results: Vec::new(),
                        execution_time_ms: elapsed,
                    },
                );
                machine.send(MachineEvent::ReceivedResult(envelope.clone()))?;
                if let Some(state) = outcome.state {
                    session.set_tool_state(tool.descriptor.id.clone(), state);
                }
                envelope
            }
            HandlerVerdict::Failed(e) => {
                machine.send(MachineEvent::Error(ErrorInfo::from_error(&e)))?;
                ToolResponse::from_error(&e, &tool.descriptor.name, Some(session_id.to_owned()), elapsed)
            }
            HandlerVerdict::TimedOut => {
                let e = Error::HandlerTimeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                };
                machine.send(MachineEvent::Error(ErrorInfo::from_error(&e)))?;
                ToolResponse::from_error(&e, &tool.descriptor.name, Some(session_id.to_owned()), elapsed)
            }
            HandlerVerdict::Cancelled => {
                machine.send(MachineEvent::Cancel)?;
                ToolResponse::error(
                    "Cancelled: execution was cancelled by request",
                    &tool.descriptor.name,
                    ErrorOptions {
                        code: Some(409),
                        data: None,
                        session_id: Some(session_id.to_owned()),
                        execution_time_ms: elapsed,
                    },
                )
            }
        };

        // A failed terminal persist leaves the in-memory transition standing
        // but the operation reports the storage failure.
        if let Err(e) = self.persist(session, machine).await {
            return Ok(ToolResponse::from_error(
                &e,
                &tool.descriptor.name,
                Some(session_id.to_owned()),
                elapsed,
            ));
        }
        Ok(envelope)
    }
}

impl std::fmt::Debug for ToolExecutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutionService")
            .field("backend", &self.store.backend_name())
            .field("tools", &self.registry.len())
            .field("active", &self.active.len())
            .finish()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
