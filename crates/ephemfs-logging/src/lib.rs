// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Logging setup for ephemfs binaries
//!
//! One subscriber per process: an [`EnvFilter`] driven by `RUST_LOG` with a
//! per-component default, feeding either a plaintext or a JSON formatter.

use std::io;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use tracing::Level;

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "EPHEMFS_LOG_FORMAT";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plaintext,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Plaintext => write!(f, "plaintext"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plaintext" | "text" => Ok(LogFormat::Plaintext),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: {s}. Use 'plaintext' or 'json'")),
        }
    }
}

impl LogFormat {
    /// Format named by [`LOG_FORMAT_ENV`], or plaintext when unset.
    ///
    /// An unrecognised value is an error rather than a silent fallback.
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var(LOG_FORMAT_ENV) {
            Ok(value) => value.parse().map_err(anyhow::Error::msg),
            Err(std::env::VarError::NotPresent) => Ok(LogFormat::Plaintext),
            Err(err) => Err(anyhow::anyhow!("{LOG_FORMAT_ENV}: {err}")),
        }
    }
}

/// Filter used when `RUST_LOG` is absent or unparsable.
pub fn default_filter(component: &str, default_level: Level) -> EnvFilter {
    let target = component.replace('-', "_");
    EnvFilter::new(format!("{default_level},{target}={default_level}"))
}

/// Initialize logging to stderr.
pub fn init(component: &str, default_level: Level, format: LogFormat) -> anyhow::Result<()> {
    init_with_writer(component, default_level, format, io::stderr)
}

/// Initialize logging at `info`, with the format taken from the environment.
pub fn init_from_env(component: &str) -> anyhow::Result<()> {
    init(component, Level::INFO, LogFormat::from_env()?)
}

/// Initialize logging with a custom writer.
///
/// Fails if a global subscriber is already installed.
pub fn init_with_writer<W>(
    component: &str,
    default_level: Level,
    format: LogFormat,
    writer: W,
) -> anyhow::Result<()>
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(component, default_level));

    match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).json();
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);

            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
        LogFormat::Plaintext => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);

            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
    }

    Ok(())
}
