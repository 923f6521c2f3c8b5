//! Logging bootstrap for binaries built on this crate.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the host process.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a compact `fmt` subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the level is `info`, raised to `debug`
/// by one `-v` and to `trace` by two or more.
pub fn init(verbose: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(())
}

fn default_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}
