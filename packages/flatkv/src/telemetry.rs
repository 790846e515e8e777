//! Log subscriber setup for the `flatkv` binary.
//!
//! Library code only emits `tracing` events; installing the subscriber is
//! the entry point's job and happens once per process.

use std::io;

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Installs the global subscriber, writing to stderr so command output on
/// stdout stays clean.
///
/// `RUST_LOG` overrides the default `info` filter.
///
/// # Errors
///
/// Fails if `RUST_LOG` cannot be parsed or a global subscriber is already
/// installed.
pub fn init(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let installed = match format {
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(io::stderr)
            .compact()
            .try_init(),
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(io::stderr)
            .json()
            .try_init(),
    };
    installed.map_err(|err| anyhow!("installing log subscriber: {err}"))
}
