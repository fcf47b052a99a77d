//! Standardized response envelope.
//!
//! Every value returned from the execution core to a transport is a
//! [`ToolResponse`]: `{data, metadata, status, context?}`. Handlers never
//! hand raw values to clients; the core wraps them here so downstream AI
//! clients can parse results uniformly.
//!
//! Validation is best-effort on success paths (log and return) and strict
//! when a consumer calls [`ToolResponse::validate`].

use std::future::Future;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::utils::time;

/// Version reported for tools that do not declare one.
pub const DEFAULT_TOOL_VERSION: &str = "1.0.0";

/// Standardized response envelope for every tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Tool payload; `null` on failures unless the handler attached error data.
    pub data: Option<Value>,
    /// Execution metadata.
    pub metadata: ResponseMetadata,
    /// Outcome status with a stable code.
    pub status: ResponseStatus,
    /// Session-scoped context; absent for unscoped invocations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ResponseContext>,
}

/// Execution metadata attached to every envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// Name of the tool that produced this response.
    pub tool: String,
    /// Tool version.
    pub version: String,
    /// Wall-clock execution time in milliseconds.
    pub execution_time_ms: u64,
    /// ISO-8601 timestamp of envelope construction.
    pub timestamp_iso: String,
    /// True when the payload was served from the result cache.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub from_cache: bool,
}

/// Outcome of the invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseStatus {
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Stable status code (HTTP-alike).
    pub code: u16,
    /// Human-readable message, present on failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Session-scoped context echoed back to the caller.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseContext {
    /// Session the invocation was scoped to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Keys of related cached or historical results.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_results: Vec<String>,
}

/// Options for [`ToolResponse::success`].
#[derive(Debug, Clone, Default)]
pub struct SuccessOptions {
    /// Tool version; defaults to [`DEFAULT_TOOL_VERSION`].
    pub version: Option<String>,
    /// Session id for `context.sessionId`.
    pub session_id: Option<String>,
    /// Related result keys.
    pub related_results: Vec<String>,
    /// Measured execution time.
    pub execution_time_ms: u64,
}

/// Options for [`ToolResponse::error`].
#[derive(Debug, Clone, Default)]
pub struct ErrorOptions {
    /// Status code; defaults to 400.
    pub code: Option<u16>,
    /// Structured error detail attached as payload.
    pub data: Option<Value>,
    /// Session id for `context.sessionId`.
    pub session_id: Option<String>,
    /// Measured execution time.
    pub execution_time_ms: u64,
}

impl ToolResponse {
    /// Build a success envelope.
    ///
    /// Best-effort validation: a malformed envelope is logged and returned
    /// anyway; strict checking is the consumer's call via [`Self::validate`].
    #[must_use]
    pub fn success(data: Value, tool: &str, opts: SuccessOptions) -> Self {
        let response = Self {
            data: Some(data),
            metadata: ResponseMetadata {
                tool: tool.to_owned(),
                version: opts
                    .version
                    .unwrap_or_else(|| DEFAULT_TOOL_VERSION.to_owned()),
                execution_time_ms: opts.execution_time_ms,
                timestamp_iso: time::to_iso(&time::now_utc()),
                from_cache: false,
            },
            status: ResponseStatus {
                success: true,
                code: 200,
                message: None,
            },
            context: build_context(opts.session_id, opts.related_results),
        };
        if let Err(e) = response.validate() {
            tracing::warn!(tool, error = %e, "constructed success envelope failed validation");
        }
        response
    }

    /// Build an error envelope.
    #[must_use]
    pub fn error(message: &str, tool: &str, opts: ErrorOptions) -> Self {
        Self {
            data: opts.data,
            metadata: ResponseMetadata {
                tool: tool.to_owned(),
                version: DEFAULT_TOOL_VERSION.to_owned(),
                execution_time_ms: opts.execution_time_ms,
                timestamp_iso: time::to_iso(&time::now_utc()),
                from_cache: false,
            },
            status: ResponseStatus {
                success: false,
                code: opts.code.unwrap_or(400),
                message: Some(message.to_owned()),
            },
            context: build_context(opts.session_id, Vec::new()),
        }
    }

    /// Build an error envelope from a domain error, using its stable kind
    /// and status code (`"SchemaViolation: name must be string"`, 422).
    #[must_use]
    pub fn from_error(err: &Error, tool: &str, session_id: Option<String>, elapsed_ms: u64) -> Self {
        Self::error(
            &format!("{}: {}", err.kind(), err.detail()),
            tool,
            ErrorOptions {
                code: Some(err.status_code()),
                data: None,
                session_id,
                execution_time_ms: elapsed_ms,
            },
        )
    }

    /// Run `f`, time it, and wrap its outcome into an envelope.
    pub async fn execute_timed<F, Fut>(tool: &str, opts: SuccessOptions, f: F) -> Self
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let started = Instant::now();
        let outcome = f().await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match outcome {
            Ok(data) => Self::success(
                data,
                tool,
                SuccessOptions {
                    execution_time_ms: elapsed_ms,
                    ..opts
                },
            ),
            Err(e) => Self::from_error(&e, tool, opts.session_id, elapsed_ms),
        }
    }

    /// Strict shape validation.
    ///
    /// # Errors
    ///
    /// Returns `SchemaViolation` when the envelope breaks its contract:
    /// empty tool name, unparsable timestamp, or a status code inconsistent
    /// with the success flag.
    pub fn validate(&self) -> Result<()> {
        if self.metadata.tool.is_empty() {
            return Err(Error::schema_violation("metadata.tool must not be empty"));
        }
        if chrono::DateTime::parse_from_rfc3339(&self.metadata.timestamp_iso).is_err() {
            return Err(Error::schema_violation(
                "metadata.timestampIso must be ISO-8601",
            ));
        }
        if self.status.success && !(200..300).contains(&self.status.code) {
            return Err(Error::schema_violation(
                "status.code must be 2xx when status.success is true",
            ));
        }
        if !self.status.success && (200..300).contains(&self.status.code) {
            return Err(Error::schema_violation(
                "status.code must not be 2xx when status.success is false",
            ));
        }
        Ok(())
    }

    /// Extract only the payload, discarding metadata and status.
    #[must_use]
    pub fn extract(self) -> Option<Value> {
        self.data
    }

    /// Mark this envelope as served from the result cache.
    ///
    /// Cached responses report zero execution time; the original timing
    /// belongs to the invocation that populated the cache.
    #[must_use]
    pub fn into_cached(mut self) -> Self {
        self.metadata.from_cache = true;
        self.metadata.execution_time_ms = 0;
        self
    }

    /// Merge several envelopes into one.
    ///
    /// Sums `executionTimeMs`, unions `relatedResults` (input order,
    /// deduplicated), inherits `sessionId` from the first non-empty one.
    /// Without a `transform` the payload is an array of the inputs' data in
    /// input order. The combined status succeeds only when every input
    /// succeeded; otherwise the first failure's code and message win.
    #[must_use]
    pub fn combine(
        responses: Vec<Self>,
        tool: &str,
        transform: Option<&dyn Fn(Vec<Value>) -> Value>,
    ) -> Self {
        let mut total_ms: u64 = 0;
        let mut related: Vec<String> = Vec::new();
        let mut session_id: Option<String> = None;
        let mut first_failure: Option<ResponseStatus> = None;
        let mut payloads: Vec<Value> = Vec::with_capacity(responses.len());

        for response in responses {
            total_ms = total_ms.saturating_add(response.metadata.execution_time_ms);
            if let Some(ctx) = &response.context {
                if session_id.is_none() {
                    session_id.clone_from(&ctx.session_id);
                }
                for key in &ctx.related_results {
                    if !related.contains(key) {
                        related.push(key.clone());
                    }
                }
            }
            if !response.status.success && first_failure.is_none() {
                first_failure = Some(response.status.clone());
            }
            payloads.push(response.data.unwrap_or(Value::Null));
        }

        let data = match transform {
            Some(t) => t(payloads),
            None => Value::Array(payloads),
        };

        match first_failure {
            None => Self::success(
                data,
                tool,
                SuccessOptions {
                    version: None,
                    session_id,
                    related_results: related,
                    execution_time_ms: total_ms,
                },
            ),
            Some(status) => {
                let mut combined = Self::error(
                    status.message.as_deref().unwrap_or("combined failure"),
                    tool,
                    ErrorOptions {
                        code: Some(status.code),
                        data: Some(data),
                        session_id,
                        execution_time_ms: total_ms,
                    },
                );
                if !related.is_empty() {
                    combined
                        .context
                        .get_or_insert_with(ResponseContext::default)
                        .related_results = related;
                }
                combined
            }
        }
    }
}

fn build_context(
    session_id: Option<String>,
    related_results: Vec<String>,
) -> Option<ResponseContext> {
    if session_id.is_none() && related_results.is_empty() {
        return None;
    }
    Some(ResponseContext {
        session_id,
        related_results,
    })
}
