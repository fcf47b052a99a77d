//! Typed MCP request arguments.
//!
//! Wire shapes match the transport contract: camelCase keys, `sessionId`
//! optional everywhere an invocation may be unscoped.

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

use mtx_application::discovery::GraphFormat;

/// Arguments for `execute_tool`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteToolArgs {
    /// Id of the registered tool to run.
    pub tool_name: String,
    /// Tool parameters validated against the declared schema.
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
    /// Session scope; generated and echoed back when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Consult the result cache before executing (default true).
    #[serde(default)]
    pub use_cached: Option<bool>,
}

/// Arguments for session-scoped operations.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionArgs {
    /// Target session id.
    pub session_id: String,
}

/// Arguments for `list_available_tools`.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsArgs {
    /// Keep only tools in this category.
    #[serde(default)]
    pub category: Option<String>,
    /// Keep only tools carrying this tag.
    #[serde(default)]
    pub tag: Option<String>,
    /// Include full parameter schemas.
    #[serde(default)]
    pub include_schemas: Option<bool>,
}

/// Arguments for `get_tool_details`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolDetailsArgs {
    /// Tool to describe.
    pub tool_name: String,
}

/// Output format accepted by `visualize_tool_relationships`.
#[derive(Debug, Clone, Copy, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum GraphFormatArg {
    /// Node/edge lists as JSON.
    #[default]
    Json,
    /// Mermaid flowchart text.
    Mermaid,
    /// GraphViz dot text.
    Dot,
}

impl From<GraphFormatArg> for GraphFormat {
    fn from(arg: GraphFormatArg) -> Self {
        match arg {
            GraphFormatArg::Json => Self::Json,
            GraphFormatArg::Mermaid => Self::Mermaid,
            GraphFormatArg::Dot => Self::Dot,
        }
    }
}

/// Arguments for `visualize_tool_relationships`.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VisualizeArgs {
    /// Requested output format (default json).
    #[serde(default)]
    pub format: GraphFormatArg,
}
