//! mtx server binary.
//!
//! Loads configuration from the environment, bootstraps the tool execution
//! core, registers the built-in tools and serves MCP over stdio or
//! streamable HTTP. Exits non-zero only on the documented fatal bootstrap
//! condition (configured backend unreachable with fallback disabled).

use std::sync::Arc;

use anyhow::Result;
use rmcp::transport::stdio;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::StreamableHttpService;
use rmcp::ServiceExt;

use mtx_infrastructure::logging::init_logging;
use mtx_infrastructure::{AppConfig, AppContext};
use mtx_server::builtin::register_builtin_tools;
use mtx_server::McpToolServer;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    init_logging(config.verbose);

    let context = AppContext::bootstrap(config).await?;
    register_builtin_tools(&context.service)?;

    let server = McpToolServer::new(
        Arc::clone(&context.service),
        Arc::clone(&context.discovery),
    );

    if context.config.stdio_transport {
        tracing::info!("serving MCP over stdio");
        let running = server.serve(stdio()).await?;
        running.waiting().await?;
    } else {
        let addr = ("0.0.0.0", context.config.port);
        tracing::info!(port = context.config.port, "serving MCP over streamable HTTP at /mcp");
        let service = StreamableHttpService::new(
            move || Ok(server.clone()),
            LocalSessionManager::default().into(),
            Default::default(),
        );
        let router = axum::Router::new().nest_service("/mcp", service);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
    }

    context.dispose().await?;
    tracing::info!("clean shutdown");
    Ok(())
}
