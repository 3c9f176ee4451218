/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};

/// Initialize structured logging based on configuration
pub fn init_logging(config: &RelayConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(config)))
        .map_err(|e| RelayError::Config(format!("Failed to create log filter: {}", e)))?;

    match config.log_file {
        Some(ref log_path) => init_file_logging(log_path, env_filter),
        None => init_stderr_logging(env_filter),
    }
}

/// Filter used when `RUST_LOG` is not set
fn default_directive(config: &RelayConfig) -> String {
    let log_level = if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    };
    format!("orbit_relay={}", log_level)
}

/// Log to stderr so stdout stays free for the batch summary
fn init_stderr_logging(env_filter: EnvFilter) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(subscriber_error)
}

/// Initialize logging to a file
fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> Result<()> {
    let file = File::create(log_path)
        .map_err(|e| RelayError::Config(format!("Failed to create log file: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(subscriber_error)
}

fn subscriber_error(e: tracing_subscriber::util::TryInitError) -> RelayError {
    RelayError::Config(format!("Failed to install log subscriber: {}", e))
}

/// Initialize logging with custom format for testing
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("orbit_relay=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok(); // Ignore error if already initialized
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use crate::error::EXIT_FATAL;
    use tempfile::TempDir;

    #[test]
    fn test_default_directive_uses_log_level() {
        let config = RelayConfig {
            log_level: LogLevel::Warn,
            ..Default::default()
        };
        assert_eq!(default_directive(&config), "orbit_relay=WARN");
    }

    #[test]
    fn test_verbose_overrides_log_level() {
        let config = RelayConfig {
            log_level: LogLevel::Error,
            verbose: true,
            ..Default::default()
        };
        assert_eq!(default_directive(&config), "orbit_relay=DEBUG");
    }

    #[test]
    fn test_default_directive_parses() {
        let config = RelayConfig::default();
        assert!(EnvFilter::try_new(default_directive(&config)).is_ok());
    }

    #[test]
    fn test_unwritable_log_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("missing").join("relay.log");

        let err = init_file_logging(&log_path, EnvFilter::new("orbit_relay=info")).unwrap_err();

        assert!(matches!(&err, RelayError::Config(msg) if msg.contains("Failed to create log file")));
        assert!(!log_path.exists());
    }

    #[test]
    fn test_init_logging_reports_bad_log_file_as_fatal() {
        let dir = TempDir::new().unwrap();
        let config = RelayConfig {
            log_file: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let err = init_logging(&config).unwrap_err();

        assert!(matches!(err, RelayError::Config(_)));
        assert_eq!(err.exit_code(), EXIT_FATAL);
    }
}
