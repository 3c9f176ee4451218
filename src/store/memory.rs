//! In-memory object store
//!
//! Stores objects in a shared map and lets tests inject failures at precise
//! points of a fetch or a put. Every fetch and put is recorded, and open
//! streams are counted so a test can assert nothing outlived a transfer.

use super::{FetchStream, ObjectLocation, ObjectStore, PutReceipt, StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default size of the chunks a fetch stream yields
const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Failure injected into a fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFault {
    /// Opening the stream fails
    OnOpen(String),

    /// The stream yields `bytes` bytes, then an error
    After { bytes: usize, message: String },

    /// The stream yields `bytes` bytes, then never produces another item
    Stall { bytes: usize },
}

/// Failure injected into a put
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutFault {
    /// The put fails before reading the body
    OnOpen(String),

    /// The put fails once at least `bytes` bytes have been read from the body
    After { bytes: usize, message: String },
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<ObjectLocation, Bytes>,
    fetch_faults: HashMap<ObjectLocation, FetchFault>,
    put_faults: HashMap<ObjectLocation, PutFault>,
    fetch_log: Vec<ObjectLocation>,
    put_log: Vec<ObjectLocation>,
}

/// In-memory [`ObjectStore`]
///
/// Cloning is cheap and clones share the same objects.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    in_flight: Arc<AtomicUsize>,
    chunk_size: usize,
    part_size: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            chunk_size: DEFAULT_CHUNK_SIZE,
            part_size: super::DEFAULT_PART_SIZE,
        }
    }

    /// Size of the chunks fetch streams yield (minimum 1)
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Part size used to report how many parts a put would have taken
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Store an object
    pub fn insert(&self, location: &ObjectLocation, data: impl Into<Bytes>) {
        self.write().objects.insert(location.clone(), data.into());
    }

    /// Get a copy of an object's bytes
    pub fn get(&self, location: &ObjectLocation) -> Option<Bytes> {
        self.read().objects.get(location).cloned()
    }

    /// Check whether an object exists
    pub fn contains(&self, location: &ObjectLocation) -> bool {
        self.read().objects.contains_key(location)
    }

    /// Number of stored objects
    pub fn object_count(&self) -> usize {
        self.read().objects.len()
    }

    /// Make fetches of `location` fail
    pub fn inject_fetch_fault(&self, location: &ObjectLocation, fault: FetchFault) {
        self.write().fetch_faults.insert(location.clone(), fault);
    }

    /// Make puts to `location` fail
    pub fn inject_put_fault(&self, location: &ObjectLocation, fault: PutFault) {
        self.write().put_faults.insert(location.clone(), fault);
    }

    /// Locations passed to `fetch`, in call order
    pub fn fetch_log(&self) -> Vec<ObjectLocation> {
        self.read().fetch_log.clone()
    }

    /// Locations passed to `put`, in call order
    pub fn put_log(&self) -> Vec<ObjectLocation> {
        self.read().put_log.clone()
    }

    /// Number of fetch streams and puts currently open
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn track(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self.in_flight.clone())
    }
}

/// Decrements the in-flight counter when dropped
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn chunked(data: Bytes, chunk_size: usize) -> Vec<StoreResult<Bytes>> {
    let mut chunks = Vec::with_capacity(data.len() / chunk_size + 1);
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + chunk_size).min(data.len());
        chunks.push(Ok(data.slice(offset..end)));
        offset = end;
    }
    chunks
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn fetch(&self, location: &ObjectLocation) -> StoreResult<FetchStream> {
        let (data, fault) = {
            let mut inner = self.write();
            inner.fetch_log.push(location.clone());
            (
                inner.objects.get(location).cloned(),
                inner.fetch_faults.get(location).cloned(),
            )
        };

        if let Some(FetchFault::OnOpen(message)) = fault {
            return Err(StoreError::Injected(message));
        }

        let data = data.ok_or_else(|| StoreError::NotFound {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
        })?;

        let limit = match &fault {
            Some(FetchFault::After { bytes, .. }) | Some(FetchFault::Stall { bytes }) => {
                (*bytes).min(data.len())
            }
            _ => data.len(),
        };

        let head = stream::iter(chunked(data.slice(..limit), self.chunk_size));
        let tail: FetchStream = match fault {
            Some(FetchFault::After { message, .. }) => {
                Box::pin(stream::once(async move {
                    Err::<Bytes, _>(StoreError::Injected(message))
                }))
            }
            Some(FetchFault::Stall { .. }) => Box::pin(stream::pending::<StoreResult<Bytes>>()),
            _ => Box::pin(stream::empty::<StoreResult<Bytes>>()),
        };

        let guard = self.track();
        Ok(Box::pin(head.chain(tail).map(move |item| {
            let _open = &guard;
            item
        })))
    }

    async fn put(
        &self,
        location: &ObjectLocation,
        body: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StoreResult<PutReceipt> {
        let fault = {
            let mut inner = self.write();
            inner.put_log.push(location.clone());
            inner.put_faults.get(location).cloned()
        };
        let _open = self.track();

        let fail_after = match fault {
            Some(PutFault::OnOpen(message)) => return Err(StoreError::Injected(message)),
            Some(PutFault::After { bytes, message }) => Some((bytes, message)),
            None => None,
        };

        let mut data = Vec::new();
        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            let n = body.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buffer[..n]);

            if let Some((bytes, message)) = &fail_after {
                if data.len() >= *bytes {
                    return Err(StoreError::Injected(message.clone()));
                }
            }
        }

        if let Some((bytes, message)) = fail_after {
            if data.len() >= bytes {
                return Err(StoreError::Injected(message));
            }
        }

        let size = data.len() as u64;
        let parts = size.div_ceil(self.part_size).max(1) as u32;
        self.write()
            .objects
            .insert(location.clone(), Bytes::from(data));

        Ok(PutReceipt {
            bytes: size,
            etag: None,
            parts,
        })
    }
}
