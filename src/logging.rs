#![forbid(unsafe_code)]

//! Tracing subscriber setup for the server binary.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_DIRECTIVE: &str = "vidgrab=info";

/// Output flavour for log lines. `LOG_FORMAT=json` selects JSON, anything
/// else keeps the human-readable formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value.map(|value| value.trim().to_ascii_lowercase()) {
            Some(ref value) if value == "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over the default
/// `vidgrab=info` directive.
pub fn init(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_line_number(false))
            .try_init(),
    };
    installed.map_err(|err| anyhow!("installing tracing subscriber: {err}"))
}
