//! Tracing setup.
//!
//! Logs go to stderr so the stdio MCP transport keeps stdout clean for
//! protocol frames. `RUST_LOG` wins when set; otherwise `VERBOSE` picks
//! between `info` and `debug`.

use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
