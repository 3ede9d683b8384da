//! Tracing setup.
//!
//! Every component logs through `tracing` with structured fields (`link`, `port`,
//! `addr`, ...). This module installs the subscriber once per process:
//! - `EnvFilter`, with `RUST_LOG` taking precedence over the configured level
//! - one `fmt` layer in pretty, compact or JSON form
//!
//! # Example
//! ```no_run
//! use rov_hub::{config::HubConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HubConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!(link = "rov", "Hub started");
//! # Ok(())
//! # }
//! ```

use crate::config::{HubConfig, LogFormat};
use crate::error::{AppResult, HubError};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Subscriber options.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: Level,
    /// Output format.
    pub format: LogFormat,
    /// Emit span open/close events.
    pub with_span_events: bool,
    /// Include source file and line.
    pub with_file_and_line: bool,
    /// Include thread names.
    pub with_thread_names: bool,
    /// Colors (pretty format only).
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Options from the `[application]` section.
    pub fn from_hub_config(config: &HubConfig) -> AppResult<Self> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: config.application.log_format,
            ..Default::default()
        })
    }

    /// Options with a custom level.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable ANSI colors.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Install the subscriber described by the `[application]` section.
pub fn init_from_config(config: &HubConfig) -> AppResult<()> {
    init(LoggingConfig::from_hub_config(config)?)
}

/// Install the subscriber.
///
/// Idempotent: if a global subscriber is already set this returns `Ok(())`.
pub fn init(config: LoggingConfig) -> AppResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(config.with_ansi)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .boxed(),
    };

    match tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .try_init()
    {
        Ok(()) => Ok(()),
        // tests and embedding applications may have installed one already
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(HubError::Configuration(format!(
            "failed to initialize tracing: {e}"
        ))),
    }
}

fn parse_log_level(level: &str) -> AppResult<Level> {
    level.parse::<Level>().map_err(|_| {
        HubError::Configuration(format!(
            "invalid log level '{level}'; must be one of trace, debug, info, warn, error"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("INFO").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("Warn").unwrap(), Level::WARN);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn reads_application_section() {
        let mut hub = HubConfig::default();
        hub.application.log_level = "debug".into();
        hub.application.log_format = LogFormat::Json;

        let config = LoggingConfig::from_hub_config(&hub).unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
    }

    // `init_twice_is_fine` lives in tests/logging_init.rs: it installs the
    // process-global subscriber, which would break `#[traced_test]` tests here.
}
