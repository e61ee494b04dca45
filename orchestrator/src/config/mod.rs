//! Configuration module for the datashell orchestrator
//!
//! Supports configuration via:
//! - YAML/TOML/JSON config files (`config/datashell.*`, `/etc/datashell/config.*`)
//! - Environment variables (`DATASHELL__SECTION__KEY`), with `.env` support

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::{resolve_label, DEFAULT_ENCODINGS};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub sessions: SessionConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub sampling: SamplingConfig,
}

/// HTTP listener and logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for JSON log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

/// Execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Timeout applied when a request names none
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Upper bound for requested timeouts
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,

    /// Per-stream cap on captured output
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// How long a new execution waits for an abandoned one to drain
    #[serde(default = "default_abandon_grace_ms")]
    pub abandon_grace_ms: u64,

    /// How long a namespace inspection waits behind a running cell
    #[serde(default = "default_inspect_wait_ms")]
    pub inspect_wait_ms: u64,

    /// Reject concurrent executions in one session instead of queueing them
    #[serde(default)]
    pub reject_when_busy: bool,
}

/// Session defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Modules bound into new sessions when auto-import is requested
    #[serde(default = "default_auto_import")]
    pub auto_import: Vec<String>,

    /// Parent of per-session working directories; the process cwd when unset
    #[serde(default)]
    pub workspace_dir: Option<PathBuf>,
}

/// File loading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Encodings tried, in order, for `encoding = "auto"`
    #[serde(default = "default_encodings")]
    pub encodings: Vec<String>,
}

/// Bounds for inspection payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_max_sample_size")]
    pub max_sample_size: usize,

    /// Default truncation length for sampled values
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,

    /// Upper bound for `preview_table` rows
    #[serde(default = "default_max_preview_rows")]
    pub max_preview_rows: usize,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_timeout_secs() -> u64 {
    600
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_abandon_grace_ms() -> u64 {
    2000
}

fn default_inspect_wait_ms() -> u64 {
    2000
}

fn default_auto_import() -> Vec<String> {
    ["frame", "stats", "json", "os", "sys", "time", "math"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_encodings() -> Vec<String> {
    DEFAULT_ENCODINGS.iter().map(|s| s.to_string()).collect()
}

fn default_max_sample_size() -> usize {
    1000
}

fn default_max_text_length() -> usize {
    100
}

fn default_max_preview_rows() -> usize {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            max_timeout_secs: default_max_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            abandon_grace_ms: default_abandon_grace_ms(),
            inspect_wait_ms: default_inspect_wait_ms(),
            reject_when_busy: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_import: default_auto_import(),
            workspace_dir: None,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            encodings: default_encodings(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_sample_size: default_max_sample_size(),
            max_text_length: default_max_text_length(),
            max_preview_rows: default_max_preview_rows(),
        }
    }
}

impl ExecutionConfig {
    /// Requested timeout, defaulted and clamped to the configured maximum
    pub fn effective_timeout(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_timeout_secs)
            .clamp(1, self.max_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        // Try to load .env file if present
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config/datashell").required(false))
            .add_source(config::File::with_name("/etc/datashell/config").required(false))
            // DATASHELL__EXECUTION__DEFAULT_TIMEOUT_SECS=60
            .add_source(
                config::Environment::with_prefix("DATASHELL")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("sessions.auto_import")
                    .with_list_parse_key("ingest.encodings"),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        let exec = &self.execution;
        if exec.default_timeout_secs == 0 || exec.max_timeout_secs == 0 {
            anyhow::bail!("Execution timeouts cannot be 0");
        }
        if exec.default_timeout_secs > exec.max_timeout_secs {
            anyhow::bail!(
                "default_timeout_secs ({}) exceeds max_timeout_secs ({})",
                exec.default_timeout_secs,
                exec.max_timeout_secs
            );
        }
        if exec.max_output_bytes < 1024 {
            anyhow::bail!("max_output_bytes must be at least 1024");
        }

        if self.ingest.encodings.is_empty() {
            anyhow::bail!("ingest.encodings cannot be empty");
        }
        if let Some(bad) = self
            .ingest
            .encodings
            .iter()
            .find(|label| resolve_label(label).is_none())
        {
            anyhow::bail!("Unknown encoding in ingest.encodings: {}", bad);
        }

        if self.sampling.max_sample_size == 0 || self.sampling.max_text_length == 0 {
            anyhow::bail!("Sampling limits must be positive");
        }
        if self.sampling.max_preview_rows == 0 {
            anyhow::bail!("max_preview_rows must be positive");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8765);
        assert_eq!(config.execution.default_timeout_secs, 30);
        assert_eq!(config.sessions.auto_import.len(), 7);
        assert_eq!(config.ingest.encodings[0], "utf-8");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = AppConfig {
            server: ServerConfig {
                port: 0,
                ..ServerConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.ingest.encodings = vec!["klingon".to_string()];
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.execution.default_timeout_secs = 900;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_timeout() {
        let exec = ExecutionConfig::default();
        assert_eq!(exec.effective_timeout(None), 30);
        assert_eq!(exec.effective_timeout(Some(5)), 5);
        assert_eq!(exec.effective_timeout(Some(10_000)), 600);
        assert_eq!(exec.effective_timeout(Some(0)), 1);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"execution": {"reject_when_busy": true}}"#).unwrap();
        assert!(config.execution.reject_when_busy);
        assert_eq!(config.execution.max_timeout_secs, 600);
        assert_eq!(config.execution.inspect_wait_ms, 2000);
        assert_eq!(config.sampling.max_text_length, 100);
    }
}
