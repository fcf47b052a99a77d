//! Built-in demonstration tools.
//!
//! The core ships without domain tools; these two exercise the stateless
//! and stateful halves of the execution contract and give a fresh install
//! something to call.

use std::sync::Arc;

use serde_json::{json, Value};

use mtx_application::execution::ToolExecutionService;
use mtx_domain::error::Result;
use mtx_domain::tool::{HandlerOutcome, ParamKind, ParameterSpec, ToolDescriptor, ToolHandler};

/// Register the built-in tools on a freshly bootstrapped service.
///
/// # Errors
///
/// Propagates duplicate-registration errors.
pub fn register_builtin_tools(service: &ToolExecutionService) -> Result<()> {
    service.register_stateful_tool(echo_descriptor(), echo_handler())?;
    service.register_stateful_tool(counter_descriptor(), counter_handler())?;
    Ok(())
}

fn echo_descriptor() -> ToolDescriptor {
    ToolDescriptor::new("echo", "Upper-cases and returns the given message")
        .with_category("demo")
        .with_tags(["utility"])
        .with_parameters(vec![ParameterSpec::required("msg", ParamKind::String)
            .with_description("Message to echo back")])
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

fn counter_descriptor() -> ToolDescriptor {
    ToolDescriptor::new("counter", "Counts invocations within the session")
        .with_category("demo")
        .with_tags(["utility", "stateful"])
}

fn counter_handler() -> ToolHandler {
    Arc::new(|_params, state| {
        Box::pin(async move {
            let n = state.and_then(|s| s["n"].as_i64()).unwrap_or(0) + 1;
            Ok(HandlerOutcome::ok(json!(n)).with_state(json!({"n": n})))
        })
    })
}
