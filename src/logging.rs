//! Log output set-up.
//!
//! Everything goes through `tracing`; `RUST_LOG` wins over `--log-level` when
//! it holds a valid filter.

use crate::config::LogLevel;
use anyhow::{anyhow, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber writing to stderr
pub fn init(level: LogLevel) -> Result<()> {
    let filter = build_filter(level, std::env::var("RUST_LOG").ok().as_deref());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true),
        )
        .with(filter)
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))
}

/// Filter from `RUST_LOG` if set and valid, otherwise from the CLI level
pub fn build_filter(level: LogLevel, rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new(level.as_filter()))
}
