//! S3 event notifications as transfer batches
//!
//! Only the fields the relay needs are decoded; everything else in the
//! notification is ignored.

use crate::error::{RelayError, Result};
use crate::store::ObjectLocation;
use crate::transfer::TransferRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An S3 event notification document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3EventRecord {
    #[serde(default)]
    pub event_source: String,

    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub event_name: String,

    pub s3: S3Entity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Object {
    /// Object key as delivered: query-escaped
    pub key: String,

    #[serde(default)]
    pub size: Option<u64>,
}

impl S3Event {
    /// Decode a notification from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let event: S3Event = serde_json::from_str(json)?;
        Ok(event)
    }

    /// One request per record, in record order
    ///
    /// The source key stays escaped (the downloader decodes it); the
    /// destination key is the record's key exactly as received.
    pub fn into_requests(self, destination_bucket: &str) -> Result<Vec<TransferRequest>> {
        self.records
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                if record.s3.bucket.name.is_empty() {
                    return Err(RelayError::Event(format!(
                        "record {} has no source bucket",
                        index
                    )));
                }
                let key = record.s3.object.key;
                let mut request = TransferRequest::new(
                    ObjectLocation::new(record.s3.bucket.name, key.clone()),
                    ObjectLocation::new(destination_bucket, key),
                );
                request.event_source = record.event_source;
                request.event_time = record.event_time;
                Ok(request)
            })
            .collect()
    }
}
