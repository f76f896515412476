//! Logging configuration using tracing
//!
//! Structured logging to stderr, filtered by RUST_LOG or a CLI verbosity level.
//! Stdout stays reserved for command output (tables, JSON snapshots).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Map a `-v` count to a default filter directive
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "followgraph=info,warn",
        2 => "followgraph=debug,info",
        _ => "trace",
    }
}

/// Initialize the tracing subscriber
///
/// RUST_LOG wins when set; otherwise the filter comes from `verbosity`
/// (0 keeps the CLI quiet at "warn").
///
/// # Example RUST_LOG values
/// - `RUST_LOG=followgraph::pipeline=debug` - Per-user progress of a run
/// - `RUST_LOG=followgraph::cache=trace` - Every cache read and write
///
/// # Errors
/// Returns an error if the subscriber has already been initialized
pub fn init(verbosity: u8) -> crate::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(verbosity > 1)
                .compact(),
        )
        .try_init()
        .map_err(|e| {
            crate::FollowGraphError::Other(format!("Failed to initialize tracing: {}", e))
        })?;

    Ok(())
}

/// Initialize logging for tests (no-op if already initialized)
pub fn init_test() {
    let _ = init(2);
}
