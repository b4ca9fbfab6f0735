//! Process-wide `tracing` subscriber.

use crate::config::LoggingSection;
use anyhow::{anyhow, Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Map a configured level name to a filter directive.
fn level_directive(level: &str) -> Option<&'static str> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over
/// `logging.level`; an unknown level falls back to `info`.
///
/// With `logging.file` set, records are appended to that file. The file
/// writer sits behind a mutex so lines from concurrent workers never
/// interleave.
pub fn init(section: &LoggingSection) -> Result<()> {
    let directive = level_directive(&section.level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive.unwrap_or("info")))
        .context("Invalid log filter")?;

    let (writer, ansi) = match &section.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {e}"))?;

    if directive.is_none() {
        warn!("Unknown log level '{}', using info", section.level);
    }
    Ok(())
}
