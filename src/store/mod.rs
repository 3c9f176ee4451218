//! Object store abstraction used by the transfer pipeline
//!
//! The pipeline only needs two capabilities from a store: an ordered byte
//! stream for an existing object, and a streaming put that consumes an
//! ordered byte stream of unknown length. Anything that can do both can act as
//! the source or the destination of a relay.
//!
//! # Implementations
//!
//! - [`S3Store`]: AWS S3 and S3-compatible services (feature `s3-native`)
//! - [`MemoryStore`]: in-process store with fault injection for tests
//!
//! # Example
//!
//! ```no_run
//! use orbit_relay::store::{MemoryStore, ObjectLocation, ObjectStore};
//! use futures::TryStreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//! store.insert(&ObjectLocation::new("src", "hello.txt"), "hi");
//!
//! let chunks: Vec<_> = store
//!     .fetch(&ObjectLocation::new("src", "hello.txt"))
//!     .await?
//!     .try_collect()
//!     .await?;
//! assert_eq!(chunks.concat(), b"hi");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod memory;

#[cfg(feature = "s3-native")]
pub mod s3;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use memory::{FetchFault, MemoryStore, PutFault};

#[cfg(feature = "s3-native")]
pub use s3::S3Store;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Default part size for streaming puts (8 MB)
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Minimum part size accepted by S3 multipart uploads (5 MB)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum part size accepted by S3 multipart uploads (5 GB)
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Ordered stream of object bytes produced by [`ObjectStore::fetch`]
pub type FetchStream = Pin<Box<dyn Stream<Item = StoreResult<Bytes>> + Send>>;

/// Address of an object: bucket plus key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    /// Bucket name
    pub bucket: String,

    /// Object key
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Same bucket, different key
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self {
            bucket: self.bucket.clone(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Confirmation returned by a successful put
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutReceipt {
    /// Number of bytes stored
    pub bytes: u64,

    /// ETag reported by the store, if any
    pub etag: Option<String>,

    /// Number of parts the object was uploaded in (1 for single-shot puts)
    pub parts: u32,
}

/// Streaming object store capability
///
/// Implementors must be `Send + Sync`: one store is shared by the downloader
/// and uploader tasks of every transfer.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open an ordered byte stream for the object at `location`
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the object doesn't exist. Errors that
    /// happen after the stream was opened are yielded as stream items.
    async fn fetch(&self, location: &ObjectLocation) -> StoreResult<FetchStream>;

    /// Store the bytes read from `body` at `location`
    ///
    /// The body is borrowed so the caller keeps ownership of the underlying
    /// resource and releases it once the put returns. The total size is not
    /// known upfront; implementations read `body` until end-of-stream. Parts
    /// are written one at a time, in order. A failed put must not leave a
    /// completed object behind.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Body` if reading `body` fails, or a store-specific
    /// error if writing fails.
    async fn put(
        &self,
        location: &ObjectLocation,
        body: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StoreResult<PutReceipt>;
}
