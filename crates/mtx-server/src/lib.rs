//! # Server Layer
//!
//! MCP transport glue: typed request arguments, the `#[tool_router]`
//! handler surface, and built-in demo tools. The binary in `main.rs`
//! bootstraps the core and serves over stdio or streamable HTTP.

/// Typed MCP request arguments
pub mod args;
/// Built-in demonstration tools
pub mod builtin;
/// MCP server and tool router
pub mod server;

pub use server::McpToolServer;
