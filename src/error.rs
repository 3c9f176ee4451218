/*!
 * Error types for orbit-relay
 */

use crate::store::StoreError;
use crate::transfer::TransferError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

/// Top-level error for the relay process
#[derive(Error, Debug)]
pub enum RelayError {
    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Event document could not be decoded
    #[error("Invalid event: {0}")]
    Event(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Store could not be set up
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A transfer failed and the batch was aborted
    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    /// Some transfers of a batch failed and were skipped
    #[error("{failed} of {attempted} transfers failed")]
    Partial { failed: usize, attempted: usize },
}

impl RelayError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // Nothing was transferred: setup failed
            RelayError::Config(_)
            | RelayError::Event(_)
            | RelayError::Io(_)
            | RelayError::Store(_) => EXIT_FATAL,
            RelayError::Transfer(_) | RelayError::Partial { .. } => EXIT_PARTIAL,
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Event(err.to_string())
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        RelayError::Config(err.to_string())
    }
}
