//! Error types for object store operations

use std::io;
use thiserror::Error;

/// Result type alias for object store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while fetching from or putting to an object store
///
/// The type is `Clone` so that a failure seen by one side of a transfer can be
/// handed to the other side of the pipe as its close reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Object not found in bucket
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Bucket not found or not accessible
    #[error("Bucket not found or not accessible: {0}")]
    BucketNotFound(String),

    /// Access denied error
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Store service error with specific error code
    #[error("Store service error ({code}): {message}")]
    Service { code: String, message: String },

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// The body handed to a put failed while being read
    #[error("Body read failed: {0}")]
    Body(String),

    /// Multipart upload error
    #[error("Multipart upload error: {0}")]
    Multipart(String),

    /// Invalid store configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Injected failure (in-memory store)
    #[error("Injected failure: {0}")]
    Injected(String),

    /// Generic SDK error
    #[error("SDK error: {0}")]
    Sdk(String),
}

impl StoreError {
    /// Check if this error indicates the object was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
            || matches!(self, StoreError::Service { code, .. } if code == "NoSuchKey")
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Body(err.to_string())
    }
}

/// Convert AWS SDK errors to StoreError
#[cfg(feature = "s3-native")]
impl<E> From<aws_sdk_s3::error::SdkError<E>> for StoreError
where
    E: std::error::Error + 'static,
{
    fn from(error: aws_sdk_s3::error::SdkError<E>) -> Self {
        use aws_sdk_s3::error::SdkError;

        match error {
            SdkError::DispatchFailure(e) => {
                StoreError::Network(format!("Network dispatch failure: {:?}", e))
            }
            SdkError::ResponseError(e) => StoreError::Network(format!("Response error: {:?}", e)),
            SdkError::TimeoutError(_) => StoreError::Network("Request timed out".to_string()),
            SdkError::ServiceError(e) => {
                let err_str = format!("{:?}", e);

                if err_str.contains("NoSuchKey") {
                    StoreError::Service {
                        code: "NoSuchKey".to_string(),
                        message: "The specified key does not exist".to_string(),
                    }
                } else if err_str.contains("NoSuchBucket") {
                    StoreError::Service {
                        code: "NoSuchBucket".to_string(),
                        message: "The specified bucket does not exist".to_string(),
                    }
                } else if err_str.contains("AccessDenied") {
                    StoreError::AccessDenied("Access denied to resource".to_string())
                } else {
                    StoreError::Service {
                        code: "Unknown".to_string(),
                        message: err_str,
                    }
                }
            }
            _ => StoreError::Sdk(format!("{:?}", error)),
        }
    }
}
