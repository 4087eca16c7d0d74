// Observability infrastructure using tracing crate
// Structured logging for the server loops without blocking the request path

use anyhow::{Context, Result};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize the observability system.
/// Sets up structured logging to stdout with JSON formatting for machine
/// parsing. Call once from the application's entry point; embedding
/// applications with their own subscriber should skip this.
pub fn init() -> Result<()> {
    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_thread_ids(true)
        .with_span_events(FmtSpan::CLOSE);

    // Configure filter from environment or use default
    // Example: RUST_LOG=quince_server=debug
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("quince_server=info"))
        .context("Failed to create tracing filter")?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    Ok(())
}
