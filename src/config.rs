//! Relay configuration: TOML file, environment overrides, validation

use crate::error::{RelayError, Result};
use crate::pipe::DEFAULT_PIPE_CAPACITY;
use crate::store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable naming the destination bucket, as set on the deployed function
pub const DESTINATION_BUCKET_ENV: &str = "destinationBucket";

/// Prefix of the `ORBIT_RELAY_*` override variables
pub const ENV_PREFIX: &str = "ORBIT_RELAY_";

/// Configuration for a relay run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Bucket every object is relayed into
    #[serde(default)]
    pub destination_bucket: String,

    /// Connection to the object store
    #[serde(default)]
    pub store: StoreConfig,

    /// Chunks buffered between the download and upload side of a transfer
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,

    /// Cancel a single transfer after this many seconds (None = no deadline)
    #[serde(default)]
    pub transfer_timeout_seconds: Option<u64>,

    /// What to do when a transfer in a batch fails
    #[serde(default)]
    pub error_mode: ErrorMode,

    /// Logging level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose output
    #[serde(default)]
    pub verbose: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            destination_bucket: String::new(),
            store: StoreConfig::default(),
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            transfer_timeout_seconds: None,
            error_mode: ErrorMode::Abort,
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

fn default_pipe_capacity() -> usize {
    DEFAULT_PIPE_CAPACITY
}

/// Error handling mode for batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Abort on first error
    #[default]
    Abort,

    /// Log the failed transfer and continue with the next
    Skip,
}

impl FromStr for ErrorMode {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(ErrorMode::Abort),
            "skip" => Ok(ErrorMode::Skip),
            other => Err(RelayError::Config(format!("Unknown error mode: {}", other))),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl FromStr for LogLevel {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(RelayError::Config(format!("Unknown log level: {}", other))),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: RelayConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup`
    ///
    /// `destinationBucket` is read first; `ORBIT_RELAY_DESTINATION_BUCKET`
    /// takes precedence over it.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        if let Some(bucket) = lookup(DESTINATION_BUCKET_ENV) {
            self.destination_bucket = bucket;
        }
        if let Some(bucket) = var("DESTINATION_BUCKET") {
            self.destination_bucket = bucket;
        }
        if let Some(region) = var("REGION") {
            self.store.region = Some(region);
        }
        if let Some(endpoint) = var("ENDPOINT") {
            self.store.endpoint = Some(endpoint);
        }
        if let Some(value) = var("FORCE_PATH_STYLE") {
            self.store.force_path_style = parse_env("FORCE_PATH_STYLE", &value)?;
        }
        if let Some(value) = var("PART_SIZE") {
            self.store.part_size = parse_env("PART_SIZE", &value)?;
        }
        if let Some(value) = var("PIPE_CAPACITY") {
            self.pipe_capacity = parse_env("PIPE_CAPACITY", &value)?;
        }
        if let Some(value) = var("TRANSFER_TIMEOUT") {
            self.transfer_timeout_seconds = Some(parse_env("TRANSFER_TIMEOUT", &value)?);
        }
        if let Some(value) = var("ERROR_MODE") {
            self.error_mode = value.parse()?;
        }
        if let Some(value) = var("LOG_LEVEL") {
            self.log_level = value.parse()?;
        }

        Ok(())
    }

    /// Check the configuration before any transfer starts
    pub fn validate(&self) -> Result<()> {
        if self.destination_bucket.trim().is_empty() {
            return Err(RelayError::Config(format!(
                "Destination bucket is not set (use --destination-bucket, {} or {}DESTINATION_BUCKET)",
                DESTINATION_BUCKET_ENV, ENV_PREFIX
            )));
        }

        if self.pipe_capacity == 0 {
            return Err(RelayError::Config(
                "Pipe capacity must be at least 1".to_string(),
            ));
        }

        if self.transfer_timeout_seconds == Some(0) {
            return Err(RelayError::Config(
                "Transfer timeout must be at least one second".to_string(),
            ));
        }

        self.store
            .validate()
            .map_err(|e| RelayError::Config(e.to_string()))
    }
}

fn parse_env<T: FromStr>(suffix: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        RelayError::Config(format!("Invalid {}{}={:?}: {}", ENV_PREFIX, suffix, value, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.pipe_capacity, DEFAULT_PIPE_CAPACITY);
        assert_eq!(config.error_mode, ErrorMode::Abort);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.transfer_timeout_seconds.is_none());
    }

    #[test]
    fn test_missing_destination_bucket_is_rejected() {
        let config = RelayConfig::default();
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        let config = RelayConfig {
            destination_bucket: "   ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_config() {
        let config = RelayConfig {
            destination_bucket: "dest".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_and_timeout_rejected() {
        let config = RelayConfig {
            destination_bucket: "dest".to_string(),
            pipe_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RelayConfig {
            destination_bucket: "dest".to_string(),
            transfer_timeout_seconds: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
destination_bucket = "archive"
error_mode = "skip"
transfer_timeout_seconds = 60

[store]
region = "us-west-2"
endpoint = "http://localhost:9000"
force_path_style = true
"#
        )
        .unwrap();

        let config = RelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.destination_bucket, "archive");
        assert_eq!(config.error_mode, ErrorMode::Skip);
        assert_eq!(config.transfer_timeout_seconds, Some(60));
        assert_eq!(config.store.region.as_deref(), Some("us-west-2"));
        assert!(config.store.force_path_style);
        assert_eq!(config.pipe_capacity, DEFAULT_PIPE_CAPACITY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "destination_bucket = ").unwrap();
        assert!(matches!(
            RelayConfig::from_file(file.path()),
            Err(RelayError::Config(_))
        ));
    }

    #[test]
    fn test_env_destination_bucket() {
        let mut config = RelayConfig::default();
        config
            .apply_env_from(env(&[("destinationBucket", "from-lambda")]))
            .unwrap();
        assert_eq!(config.destination_bucket, "from-lambda");

        config
            .apply_env_from(env(&[
                ("destinationBucket", "from-lambda"),
                ("ORBIT_RELAY_DESTINATION_BUCKET", "from-prefix"),
            ]))
            .unwrap();
        assert_eq!(config.destination_bucket, "from-prefix");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RelayConfig::default();
        config
            .apply_env_from(env(&[
                ("ORBIT_RELAY_REGION", "eu-central-1"),
                ("ORBIT_RELAY_FORCE_PATH_STYLE", "true"),
                ("ORBIT_RELAY_PIPE_CAPACITY", "16"),
                ("ORBIT_RELAY_TRANSFER_TIMEOUT", "30"),
                ("ORBIT_RELAY_ERROR_MODE", "Skip"),
                ("ORBIT_RELAY_LOG_LEVEL", "debug"),
            ]))
            .unwrap();

        assert_eq!(config.store.region.as_deref(), Some("eu-central-1"));
        assert!(config.store.force_path_style);
        assert_eq!(config.pipe_capacity, 16);
        assert_eq!(config.transfer_timeout_seconds, Some(30));
        assert_eq!(config.error_mode, ErrorMode::Skip);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_env_invalid_number() {
        let mut config = RelayConfig::default();
        let result = config.apply_env_from(env(&[("ORBIT_RELAY_PIPE_CAPACITY", "many")]));
        assert!(matches!(result, Err(RelayError::Config(msg)) if msg.contains("PIPE_CAPACITY")));
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Warn.to_tracing_level(), tracing::Level::WARN);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
