//! Bootstrap utilities for the meshrun binary.
//!
//! Shared initialization code: tracing setup and static peer parsing.

use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the MESHRUN_LOG environment variable.
///
/// Defaults to "info" level if MESHRUN_LOG is not set. Logs go to stderr so
/// stdout stays reserved for function output in stdin mode.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Parse a static endpoints string into `(capability, address)` pairs.
///
/// Format: `"capability=address,capability=address"`. Whitespace around
/// entries is ignored; malformed entries are skipped with a warning.
pub fn parse_static_endpoints(endpoints: &str) -> Vec<(String, String)> {
    endpoints
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.split_once('=') {
            Some((capability, address)) if !capability.is_empty() && !address.is_empty() => {
                Some((capability.trim().to_string(), address.trim().to_string()))
            }
            _ => {
                warn!(entry = %entry, "Ignoring malformed static endpoint");
                None
            }
        })
        .collect()
}
