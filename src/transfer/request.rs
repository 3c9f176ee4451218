//! Transfer requests and their outcomes

use super::TransferError;
use crate::store::ObjectLocation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One unit of work: copy `source` to `destination`
///
/// The source key may be query-escaped and is decoded before fetching. The
/// destination key is used exactly as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Where to fetch from (key possibly escaped)
    pub source: ObjectLocation,

    /// Where to put to (key used verbatim)
    pub destination: ObjectLocation,

    /// When the triggering event happened, for logging
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,

    /// Service that emitted the triggering event, for logging
    #[serde(default)]
    pub event_source: String,
}

impl TransferRequest {
    pub fn new(source: ObjectLocation, destination: ObjectLocation) -> Self {
        Self {
            source,
            destination,
            event_time: None,
            event_source: String::new(),
        }
    }

    /// Attach the triggering event's source and time
    pub fn with_event(mut self, event_source: impl Into<String>, event_time: DateTime<Utc>) -> Self {
        self.event_source = event_source.into();
        self.event_time = Some(event_time);
        self
    }
}

/// Result of one transfer
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    /// Source as requested (undecoded key)
    pub source: ObjectLocation,

    /// Destination written to
    pub destination: ObjectLocation,

    /// Bytes delivered to the destination
    pub bytes_transferred: u64,

    /// Parts the destination object was written in (0 on failure)
    pub parts: u32,

    /// Why the transfer failed, if it did
    pub error: Option<TransferError>,

    /// Wall-clock time from start to both tasks joined
    pub duration: Duration,
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Bytes transferred on success, the error otherwise
    pub fn into_result(self) -> Result<u64, TransferError> {
        match self.error {
            None => Ok(self.bytes_transferred),
            Some(error) => Err(error),
        }
    }
}
