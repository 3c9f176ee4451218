//! Connection settings for S3-compatible stores

use super::error::{StoreError, StoreResult};
use super::{DEFAULT_PART_SIZE, MAX_PART_SIZE, MIN_PART_SIZE};
use serde::{Deserialize, Serialize};

/// S3 client configuration
///
/// Bucket names are not part of the connection: sources come from events and
/// the destination from [`RelayConfig`](crate::config::RelayConfig), and the
/// same client serves both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// AWS region (e.g., "us-east-1"); the default provider chain is used when unset
    pub region: Option<String>,

    /// Custom endpoint URL (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,

    /// AWS access key ID (optional - uses credential chain if not provided)
    pub access_key: Option<String>,

    /// AWS secret access key (optional - uses credential chain if not provided)
    pub secret_key: Option<String>,

    /// Session token (for temporary credentials)
    pub session_token: Option<String>,

    /// Path-style addressing (required for some S3-compatible services)
    pub force_path_style: bool,

    /// Per-operation timeout in seconds
    pub timeout_seconds: u64,

    /// Part size for streaming puts
    pub part_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            session_token: None,
            force_path_style: false,
            timeout_seconds: 300,
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

impl StoreConfig {
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn with_path_style(mut self, force_path_style: bool) -> Self {
        self.force_path_style = force_path_style;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> StoreResult<()> {
        if self.part_size < MIN_PART_SIZE {
            return Err(StoreError::InvalidConfig(format!(
                "Part size {} is below the S3 minimum of {} bytes",
                self.part_size, MIN_PART_SIZE
            )));
        }

        if self.part_size > MAX_PART_SIZE {
            return Err(StoreError::InvalidConfig(format!(
                "Part size {} exceeds the S3 maximum of {} bytes",
                self.part_size, MAX_PART_SIZE
            )));
        }

        if self.timeout_seconds == 0 {
            return Err(StoreError::InvalidConfig(
                "Timeout must be at least one second".to_string(),
            ));
        }

        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(StoreError::InvalidConfig(
                "Both access_key and secret_key must be provided together".to_string(),
            ));
        }

        if self.session_token.is_some() && self.access_key.is_none() {
            return Err(StoreError::InvalidConfig(
                "session_token requires access_key and secret_key".to_string(),
            ));
        }

        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(StoreError::InvalidConfig(format!(
                    "Endpoint must start with http:// or https://: {}",
                    endpoint
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.part_size, DEFAULT_PART_SIZE);
        assert!(!config.force_path_style);
    }

    #[test]
    fn test_part_size_limits() {
        let mut config = StoreConfig::default();
        config.part_size = 1024;
        assert!(config.validate().is_err());

        config.part_size = MIN_PART_SIZE;
        assert!(config.validate().is_ok());

        config.part_size = MAX_PART_SIZE + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_part_size_beyond_u32() {
        assert_eq!(MAX_PART_SIZE, 5 * 1024 * 1024 * 1024u64);

        let config: StoreConfig = toml::from_str("part_size = 5368709120").unwrap();
        assert_eq!(config.part_size, MAX_PART_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_credentials_must_pair() {
        let mut config = StoreConfig::default();
        config.access_key = Some("AKIA".to_string());
        assert!(config.validate().is_err());

        let config = StoreConfig::default().with_credentials("AKIA", "secret");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_endpoint_scheme() {
        let config = StoreConfig::default().with_endpoint("localhost:9000");
        assert!(matches!(config.validate(), Err(StoreError::InvalidConfig(_))));

        let config = StoreConfig::default()
            .with_endpoint("http://localhost:9000")
            .with_path_style(true);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let config: StoreConfig = toml::from_str(
            r#"
            region = "eu-west-1"
            force_path_style = true
            "#,
        )
        .unwrap();

        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert!(config.force_path_style);
        assert_eq!(config.timeout_seconds, 300);
    }
}
