//! Tracing setup for test binaries.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `filter`, falling back to `RUST_LOG`
/// and then to `info`.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(filter: Option<&str>) -> anyhow::Result<()> {
    let env_filter = match filter {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}
