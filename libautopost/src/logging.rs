//! Logging setup for processes that host automation runs
//!
//! Run workers log through `tracing` with structured fields (`run_id`,
//! `item_id`, `profile_id`, `step`). This module installs a subscriber that
//! renders those events as text, JSON, or pretty output on stderr.
//!
//! ```no_run
//! use libautopost::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "libautopost=debug,info").init();
//!
//! // Or pick settings from AUTOPOST_LOG_FORMAT / AUTOPOST_LOG_LEVEL
//! libautopost::logging::init_default();
//! ```

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

const FORMAT_ENV: &str = "AUTOPOST_LOG_FORMAT";
const LEVEL_ENV: &str = "AUTOPOST_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Plain text, no colors
    #[default]
    Text,
    /// One JSON object per line, with span context
    Json,
    /// Multi-line colored output for development
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "plain" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub directive: String,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, directive: impl Into<String>) -> Self {
        Self {
            format,
            directive: directive.into(),
        }
    }

    /// Read `AUTOPOST_LOG_FORMAT` and `AUTOPOST_LOG_LEVEL`, falling back to text/info.
    ///
    /// An unparseable format is ignored rather than rejected so a typo in the
    /// environment never keeps a host from starting.
    pub fn from_env() -> Self {
        let format = std::env::var(FORMAT_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        let directive = std::env::var(LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
        Self::new(format, directive)
    }

    /// Debug-level variant used by `--verbose` flags
    pub fn verbose(mut self) -> Self {
        self.directive = "debug".to_string();
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.directive))
    }

    /// Install the global subscriber.
    ///
    /// Returns an error instead of panicking when a subscriber is already set,
    /// which happens when several tests or an embedding host initialize logging.
    pub fn try_init(&self) -> Result<(), String> {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(self.filter())
            .with_writer(std::io::stderr);

        let result = match self.format {
            LogFormat::Json => builder
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => builder
                .pretty()
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .try_init(),
            LogFormat::Text => builder.with_target(false).with_level(true).try_init(),
        };

        result.map_err(|e| e.to_string())
    }

    /// Install the global subscriber, ignoring an already-installed one
    pub fn init(&self) {
        if let Err(e) = self.try_init() {
            tracing::debug!("Logging already initialized: {}", e);
        }
    }
}

/// Initialize logging from the environment
pub fn init_default() {
    LoggingConfig::from_env().init();
}
