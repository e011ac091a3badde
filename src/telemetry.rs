// 📝 Logging setup for the binaries
//
// RUST_LOG wins over the configured filter. The TUI passes `Output::File` or
// `Output::Discard` so log lines never land on the alternate screen.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub enum Output<'a> {
    Stderr,
    File(&'a Path),
    Discard,
}

fn filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Calling it twice is harmless.
pub fn init(default_directive: &str, output: Output<'_>) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(filter(default_directive));

    let installed = match output {
        Output::Stderr => builder.with_writer(std::io::stderr).try_init(),
        Output::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .try_init()
        }
        Output::Discard => builder.with_writer(std::io::sink).try_init(),
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
