//! Logging module for the datashell orchestrator
//!
//! Structured logging with tracing: pretty output on a terminal, JSON
//! otherwise, plus an optional JSON log file.

use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::ServerConfig;

const LOG_FILE: &str = "orchestrator.log";

fn parse_level(log_level: &str) -> Level {
    match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn default_directives(level: Level) -> String {
    format!(
        "datashell_orchestrator={level},tower_http={level}",
        level = level.as_str().to_lowercase()
    )
}

fn open_log_file(dir: &Path) -> Result<std::fs::File> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let path = dir.join(LOG_FILE);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Initialize the logging/tracing system. `RUST_LOG` overrides the configured level.
pub fn init_logging(server: &ServerConfig) -> Result<()> {
    let level = parse_level(&server.log_level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let is_terminal = std::io::stdout().is_terminal();

    // Development: pretty colored output
    let pretty_layer = is_terminal.then(|| {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .pretty()
            .with_writer(std::io::stdout)
    });

    // Production: JSON lines on stdout
    let json_layer = (!is_terminal).then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .json()
            .with_writer(std::io::stdout)
    });

    let file_layer = match &server.log_dir {
        Some(dir) => {
            let file = Arc::new(open_log_file(dir)?);
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false)
                    .json()
                    .with_writer(file),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_level_parsing() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }

    #[test]
    fn test_default_directives() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "datashell_orchestrator=debug,tower_http=debug"
        );
    }

    #[test]
    fn test_log_file_created_under_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs");
        open_log_file(&nested).unwrap();
        assert!(nested.join(LOG_FILE).is_file());
    }
}
