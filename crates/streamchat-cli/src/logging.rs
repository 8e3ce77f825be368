//! Tracing setup for the binary.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable holding the log filter, e.g. `streamchat_core=debug`.
pub const LOG_ENV: &str = "STREAMCHAT_LOG";

/// Installs a stderr fmt layer filtered by `STREAMCHAT_LOG`.
///
/// `verbose` raises the fallback level from `warn` to `debug` when the
/// variable is unset.
pub fn init_tracing(verbose: bool) -> Result<()> {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .with(filter)
        .try_init()
        .map_err(|err| anyhow!("Failed to initialize tracing: {err}"))?;

    tracing::debug!(filter_env = LOG_ENV, "Tracing initialized");
    Ok(())
}
