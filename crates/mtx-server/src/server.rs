//! MCP server and tool router.
//!
//! Every handler returns the standardized response envelope serialized as
//! the tool result content. Failures stay inside the envelope — the MCP
//! error channel is reserved for protocol-level problems.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ErrorData, ServerHandler};
use serde_json::Map;

use mtx_application::discovery::{ListToolsFilter, ToolDiscovery};
use mtx_application::execution::ToolExecutionService;
use mtx_domain::envelope::ToolResponse;

use crate::args::{
    ExecuteToolArgs, ListToolsArgs, SessionArgs, ToolDetailsArgs, VisualizeArgs,
};

/// MCP-facing surface over the tool execution core.
#[derive(Clone)]
pub struct McpToolServer {
    service: Arc<ToolExecutionService>,
    discovery: Arc<ToolDiscovery>,
    tool_router: ToolRouter<Self>,
}

fn envelope_result(envelope: &ToolResponse) -> Result<CallToolResult, ErrorData> {
    let json = serde_json::to_string_pretty(envelope)
        .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;
    let content = vec![Content::text(json)];
    if envelope.status.success {
        Ok(CallToolResult::success(content))
    } else {
        Ok(CallToolResult::error(content))
    }
}

#[tool_router]
impl McpToolServer {
    /// Wire the router over the execution service and discovery surface.
    #[must_use]
    pub fn new(service: Arc<ToolExecutionService>, discovery: Arc<ToolDiscovery>) -> Self {
        Self {
            service,
            discovery,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Execute a registered tool in a session scope. Consults the result cache first; on a miss drives the select/parameters/execute lifecycle and caches the success envelope."
    )]
    async fn execute_tool(
        &self,
        Parameters(args): Parameters<ExecuteToolArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let envelope = self
            .service
            .execute_tool(
                &args.tool_name,
                args.parameters.unwrap_or_else(Map::new),
                args.session_id,
                args.use_cached.unwrap_or(true),
            )
            .await;
        envelope_result(&envelope)
    }

    #[tool(
        description = "Read a session's machine state, context and history. Terminal states (succeeded, failed, cancelled) stay observable here."
    )]
    async fn get_session_context(
        &self,
        Parameters(args): Parameters<SessionArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        envelope_result(&self.service.get_context(&args.session_id).await)
    }

    #[tool(
        description = "Reset a session's machine to idle. Clears the selected tool, parameters and last result; history is kept."
    )]
    async fn reset_session(
        &self,
        Parameters(args): Parameters<SessionArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        envelope_result(&self.service.reset(&args.session_id).await)
    }

    #[tool(
        description = "Remove a session's state and invalidate its cached results."
    )]
    async fn clear_session(
        &self,
        Parameters(args): Parameters<SessionArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        envelope_result(&self.service.clear_session(&args.session_id).await)
    }

    #[tool(
        description = "Request cooperative cancellation of a session's executing run. The handler finishes naturally; its result is discarded and not cached."
    )]
    async fn cancel_execution(
        &self,
        Parameters(args): Parameters<SessionArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        envelope_result(&self.service.cancel(&args.session_id).await)
    }

    #[tool(
        description = "List registered tools with optional category and tag filters."
    )]
    async fn list_available_tools(
        &self,
        Parameters(args): Parameters<ListToolsArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let filter = ListToolsFilter {
            category: args.category,
            tag: args.tag,
            include_schemas: args.include_schemas.unwrap_or(false),
        };
        envelope_result(&self.discovery.list_available_tools(&filter))
    }

    #[tool(description = "Full descriptor for one registered tool.")]
    async fn get_tool_details(
        &self,
        Parameters(args): Parameters<ToolDetailsArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        envelope_result(&self.discovery.get_tool_details(&args.tool_name))
    }

    #[tool(
        description = "Relationship graph over the tool catalog (shared categories and tags) as json, mermaid or dot."
    )]
    async fn visualize_tool_relationships(
        &self,
        Parameters(args): Parameters<VisualizeArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        envelope_result(&self.discovery.visualize_tool_relationships(args.format.into()))
    }

    #[tool(description = "Read-only result cache statistics.")]
    async fn get_cache_stats(&self) -> Result<CallToolResult, ErrorData> {
        let stats = self.service.cache().stats().await;
        let data = serde_json::to_value(&stats)
            .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;
        envelope_result(&ToolResponse::success(
            data,
            "get_cache_stats",
            mtx_domain::envelope::SuccessOptions::default(),
        ))
    }
}

#[tool_handler]
impl ServerHandler for McpToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Stateful tool execution server. Invoke execute_tool with a sessionId to \
                 accumulate per-session tool state; discovery tools describe the catalog."
                    .to_owned(),
            ),
            ..ServerInfo::default()
        }
    }
}
