//! Error types for a single transfer

use crate::store::{ObjectLocation, StoreError};
use std::io;
use thiserror::Error;

/// Result type alias for transfer operations
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors local to one transfer request
///
/// `Clone` because the error that closes one end of a pipe is also delivered
/// to the other end.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The source key is not valid percent-encoding
    #[error("Malformed source key '{key}': {reason}")]
    Decode { key: String, reason: String },

    /// Reading the source object failed
    #[error("Fetch from {location} failed: {source}")]
    Fetch {
        location: ObjectLocation,
        source: StoreError,
    },

    /// Writing the destination object failed
    #[error("Put to {location} failed: {source}")]
    Put {
        location: ObjectLocation,
        source: StoreError,
    },

    /// One end of the pipe went away while the other still had work
    #[error("Pipe broken: {0}")]
    PipeBroken(String),

    /// The transfer was cancelled or ran past its deadline
    #[error("Transfer cancelled: {0}")]
    Cancelled(String),

    /// A transfer task panicked or was aborted
    #[error("Transfer task failed: {0}")]
    TaskFailed(String),
}

impl TransferError {
    /// Short name of the error kind, for logs and summaries
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::Decode { .. } => "decode",
            TransferError::Fetch { .. } => "fetch",
            TransferError::Put { .. } => "put",
            TransferError::PipeBroken(_) => "pipe_broken",
            TransferError::Cancelled(_) => "cancelled",
            TransferError::TaskFailed(_) => "task_failed",
        }
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, TransferError::Decode { .. })
    }

    pub fn is_fetch(&self) -> bool {
        matches!(self, TransferError::Fetch { .. })
    }

    pub fn is_put(&self) -> bool {
        matches!(self, TransferError::Put { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled(_))
    }

    /// Wrap into an `io::Error` so the error can cross an `AsyncRead` boundary
    ///
    /// Never `Interrupted`: readers retry on that kind, and a closed pipe
    /// repeats its error forever.
    pub fn into_io(self) -> io::Error {
        let kind = match self {
            TransferError::PipeBroken(_) => io::ErrorKind::BrokenPipe,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let fetch = TransferError::Fetch {
            location: ObjectLocation::new("src", "a.txt"),
            source: StoreError::Network("reset".to_string()),
        };
        assert_eq!(fetch.kind(), "fetch");
        assert!(fetch.is_fetch());
        assert!(!fetch.is_put());

        assert_eq!(TransferError::PipeBroken("x".into()).kind(), "pipe_broken");
        assert!(TransferError::Cancelled("x".into()).is_cancelled());
    }

    #[test]
    fn test_error_display_names_location() {
        let err = TransferError::Put {
            location: ObjectLocation::new("dest", "b.txt"),
            source: StoreError::AccessDenied("no".to_string()),
        };
        assert_eq!(err.to_string(), "Put to dest/b.txt failed: Access denied: no");
    }

    #[test]
    fn test_into_io_keeps_error() {
        let io_err = TransferError::PipeBroken("reader gone".into()).into_io();
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);

        let inner = io_err
            .get_ref()
            .and_then(|e| e.downcast_ref::<TransferError>())
            .cloned();
        assert_eq!(inner, Some(TransferError::PipeBroken("reader gone".into())));
    }
}
