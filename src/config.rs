//! Configuration module for the time server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::runtime::{IdleConfig, SessionConfig, DEFAULT_MAX_LINE_LENGTH, DEFAULT_READ_BUFFER_SIZE};

/// Command-line arguments for the time server
#[derive(Parser, Debug)]
#[command(name = "time-server")]
#[command(author = "time-server authors")]
#[command(version = "0.1.0")]
#[command(about = "A line-oriented TCP time server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host address to bind to (e.g., 127.0.0.1)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of recent messages to retain
    #[arg(long)]
    pub history_capacity: Option<usize>,

    /// Seconds without reads or writes before a session is reported idle
    #[arg(short = 'i', long)]
    pub idle_timeout: Option<u64>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub history: HistorySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Number of worker threads
    pub workers: Option<usize>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
        }
    }
}

/// Per-session transport configuration
#[derive(Debug, Deserialize)]
pub struct SessionSection {
    /// Seconds of combined read and write inactivity before an idle event
    #[serde(default = "default_idle_both_secs")]
    pub idle_both_secs: Option<u64>,
    /// Seconds without reads before an idle event (unset = disabled)
    pub idle_read_secs: Option<u64>,
    /// Seconds without writes before an idle event (unset = disabled)
    pub idle_write_secs: Option<u64>,
    /// Transport read buffer size in bytes
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Longest accepted line in bytes
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            idle_both_secs: default_idle_both_secs(),
            idle_read_secs: None,
            idle_write_secs: None,
            read_buffer_size: default_read_buffer_size(),
            max_line_length: default_max_line_length(),
        }
    }
}

/// Message history configuration
#[derive(Debug, Deserialize)]
pub struct HistorySection {
    /// Maximum number of retained messages
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9123
}

fn default_idle_both_secs() -> Option<u64> {
    Some(10)
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

fn default_history_capacity() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub history_capacity: NonZeroUsize,
    pub session: SessionConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
            history_capacity: NonZeroUsize::new(default_history_capacity())
                .unwrap_or(NonZeroUsize::MIN),
            session: SessionConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve already-parsed CLI arguments, reading the config file if named.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence) and validate.
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let session = toml_config.session;

        let history_capacity = cli
            .history_capacity
            .unwrap_or(toml_config.history.capacity);
        let history_capacity = NonZeroUsize::new(history_capacity)
            .ok_or_else(|| ConfigError::Invalid("history capacity must be positive".into()))?;

        if session.read_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "read buffer size must be positive".into(),
            ));
        }
        if session.max_line_length == 0 {
            return Err(ConfigError::Invalid(
                "max line length must be positive".into(),
            ));
        }
        if let Some(0) = cli.workers.or(toml_config.server.workers) {
            return Err(ConfigError::Invalid("workers must be positive".into()));
        }

        let idle = IdleConfig {
            reader: idle_threshold("idle_read_secs", session.idle_read_secs)?,
            writer: idle_threshold("idle_write_secs", session.idle_write_secs)?,
            both: idle_threshold("idle_both_secs", cli.idle_timeout.or(session.idle_both_secs))?,
        };

        Ok(Config {
            host: cli.listen.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            workers: cli.workers.or(toml_config.server.workers),
            history_capacity,
            session: SessionConfig {
                idle,
                read_buffer_size: session.read_buffer_size,
                max_line_length: session.max_line_length,
            },
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Longest accepted idle threshold: one year.
const MAX_IDLE_SECS: u64 = 365 * 24 * 60 * 60;

fn idle_threshold(name: &str, secs: Option<u64>) -> Result<Option<Duration>, ConfigError> {
    match secs {
        Some(0) => Err(ConfigError::Invalid(format!("{name} must be positive"))),
        Some(secs) if secs > MAX_IDLE_SECS => Err(ConfigError::Invalid(format!(
            "{name} must be at most {MAX_IDLE_SECS}"
        ))),
        Some(secs) => Ok(Some(Duration::from_secs(secs))),
        None => Ok(None),
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
