//! Structured logging setup.
//!
//! Uses `tracing` and `tracing-subscriber` with environment-based filtering:
//! `RUST_LOG` wins when set, otherwise the configured `log_level` applies.
//! Initialization is idempotent so tests and the binary can both call it.

use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::config::LoggerConfig;
use crate::error::{AppResult, LoggerError};

/// Output format for log lines.
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Pretty-printed with ANSI colors, for interactive use.
    Pretty,
    /// Compact single-line output without colors, for service logs.
    Compact,
}

/// Subscriber options, usually derived from [`LoggerConfig`].
#[derive(Debug, Clone)]
pub struct TracingOptions {
    /// Minimum level when `RUST_LOG` is unset.
    pub level: Level,
    /// Line format.
    pub format: OutputFormat,
    /// Include file and line numbers.
    pub with_file_and_line: bool,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_file_and_line: false,
        }
    }
}

/// Initialize tracing from the application configuration.
pub fn init_from_config(config: &LoggerConfig) -> AppResult<()> {
    let level = parse_log_level(&config.application.log_level)?;
    init(TracingOptions {
        level,
        ..Default::default()
    })
}

/// Initialize the global subscriber. Safe to call more than once; a second
/// call is a no-op rather than an error.
pub fn init(options: TracingOptions) -> AppResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.level.to_string().to_lowercase()));

    let result = match options.format {
        OutputFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_file(options.with_file_and_line)
                .with_line_number(options.with_file_and_line)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
        OutputFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_ansi(false)
                .with_file(options.with_file_and_line)
                .with_line_number(options.with_file_and_line)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
    };

    match result {
        Ok(()) => Ok(()),
        // Already initialized: expected when tests share a process.
        Err(_) => Ok(()),
    }
}

fn parse_log_level(level: &str) -> AppResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(LoggerError::Configuration(format!(
            "Invalid log level '{other}'. Must be one of: trace, debug, info, warn, error"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_levels_case_insensitively() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("Warn"), Ok(Level::WARN)));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn repeated_init_is_harmless() {
        init(TracingOptions::default()).unwrap();
        init(TracingOptions::default()).unwrap();
    }
}
