//! Logging initialization for the relay.
//!
//! Always logs to stderr. When `logging.directory` is set, a daily rolling
//! file is written as well. Audit events use the `audit` target.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// File name prefix of the rolling log
pub const LOG_FILE_PREFIX: &str = "git-relay.log";

/// Result of logging initialization
pub struct LoggingHandle {
    /// Guard that must be kept alive for the duration of the program.
    /// When dropped, ensures all buffered logs are flushed.
    pub _guard: Option<WorkerGuard>,

    /// Directory of the rolling log file, when file logging is enabled
    pub log_dir: Option<PathBuf>,
}

/// Filter directive: `RUST_LOG` wins, then `--debug`/`server.debug`, then the configured level
pub fn filter_directive(config: &Config, debug_override: bool, rust_log: Option<String>) -> String {
    if let Some(directive) = rust_log.filter(|d| !d.trim().is_empty()) {
        return directive;
    }
    if debug_override || config.server.debug {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    }
}

/// Initialize logging; keep the returned handle alive until exit
pub fn init_logging(config: &Config, debug_override: bool) -> Result<LoggingHandle> {
    let directive = filter_directive(config, debug_override, std::env::var("RUST_LOG").ok());
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("Invalid log filter '{directive}'"))?;

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match &config.logging.directory {
        Some(dir) => {
            let log_dir = PathBuf::from(dir);
            std::fs::create_dir_all(&log_dir)
                .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

            let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false) // No ANSI codes in log files
                        .with_writer(non_blocking),
                )
                .init();

            Ok(LoggingHandle {
                _guard: Some(guard),
                log_dir: Some(log_dir),
            })
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();

            Ok(LoggingHandle {
                _guard: None,
                log_dir: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_wins() {
        let config = Config::default();
        assert_eq!(
            filter_directive(&config, true, Some("git_relay=trace".to_string())),
            "git_relay=trace"
        );
    }

    #[test]
    fn test_debug_flag_overrides_level() {
        let mut config = Config::default();
        config.logging.level = "warn".to_string();
        assert_eq!(filter_directive(&config, true, None), "debug");
        assert_eq!(filter_directive(&config, false, None), "warn");

        config.server.debug = true;
        assert_eq!(filter_directive(&config, false, Some("  ".to_string())), "debug");
    }

    #[test]
    fn test_default_directive_parses() {
        let config = Config::default();
        let directive = filter_directive(&config, false, None);
        assert!(EnvFilter::try_new(directive).is_ok());
    }
}
