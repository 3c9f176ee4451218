//! Source side of a transfer: store fetch stream into the pipe's write end

use super::keys::decode_source_key;
use super::{TransferError, TransferResult};
use crate::pipe::PipeWriter;
use crate::store::{ObjectLocation, ObjectStore};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Copies one source object into a pipe
///
/// Only one chunk is ever in flight: the next chunk is not polled from the
/// store until the previous one has been accepted by the pipe. The pipe is a
/// strictly ordered conduit, so ordering is settled before bytes enter it.
pub struct Downloader {
    store: Arc<dyn ObjectStore>,
    source: ObjectLocation,
}

impl Downloader {
    /// `source.key` may be query-escaped; it is decoded before fetching
    pub fn new(store: Arc<dyn ObjectStore>, source: ObjectLocation) -> Self {
        Self { store, source }
    }

    /// Run to completion and close `writer`
    ///
    /// The write end is closed exactly once whatever happens: cleanly after
    /// the last chunk, or with the error that stopped the copy (decode,
    /// fetch, a closed reader, or cancellation).
    ///
    /// Returns the number of bytes written into the pipe.
    pub async fn run(self, mut writer: PipeWriter, cancel: CancellationToken) -> TransferResult<u64> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled("download cancelled".to_string())),
            result = self.copy_into(&mut writer) => result,
        };

        match &result {
            Ok(bytes) => {
                debug!(source = %self.source, bytes, "Download complete");
                writer.close();
            }
            Err(e) => {
                warn!(source = %self.source, error = %e, "Download failed");
                writer.close_with_error(e.clone());
            }
        }

        result
    }

    async fn copy_into(&self, writer: &mut PipeWriter) -> TransferResult<u64> {
        let key = decode_source_key(&self.source.key)?;
        let location = self.source.with_key(key);
        if location.key != self.source.key {
            debug!(raw = %self.source.key, decoded = %location.key, "Decoded source key");
        }

        let mut stream = self
            .store
            .fetch(&location)
            .await
            .map_err(|source| TransferError::Fetch {
                location: location.clone(),
                source,
            })?;

        let mut copied = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| TransferError::Fetch {
                location: location.clone(),
                source,
            })?;
            copied += writer.write(chunk).await? as u64;
        }

        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::stream_pipe;
    use crate::store::{FetchFault, MemoryStore};

    fn setup(key: &str, data: &'static str) -> (MemoryStore, Arc<dyn ObjectStore>) {
        let store = MemoryStore::new().with_chunk_size(5);
        store.insert(&ObjectLocation::new("src", key), data);
        let shared: Arc<dyn ObjectStore> = Arc::new(store.clone());
        (store, shared)
    }

    #[tokio::test]
    async fn test_downloads_into_pipe() {
        let (_, store) = setup("dummyfile.txt", "Hi there, this is a test file");
        let (writer, mut reader) = stream_pipe(1);
        let downloader = Downloader::new(store, ObjectLocation::new("src", "dummyfile.txt"));

        let task = tokio::spawn(downloader.run(writer, CancellationToken::new()));

        let mut received = Vec::new();
        while let Some(chunk) = reader.read_chunk().await.unwrap() {
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, b"Hi there, this is a test file");
        assert_eq!(task.await.unwrap().unwrap(), 29);
        reader.close();
    }

    #[tokio::test]
    async fn test_fetches_decoded_key() {
        let (memory, store) = setup("jane@example.com.txt", "mail");
        let (writer, reader) = stream_pipe(4);
        let downloader = Downloader::new(store, ObjectLocation::new("src", "jane%40example.com.txt"));

        let bytes = downloader.run(writer, CancellationToken::new()).await.unwrap();

        assert_eq!(bytes, 4);
        assert_eq!(
            memory.fetch_log(),
            vec![ObjectLocation::new("src", "jane@example.com.txt")]
        );
        reader.close();
    }

    #[tokio::test]
    async fn test_decode_error_closes_writer_without_fetch() {
        let (memory, store) = setup("a.txt", "data");
        let (writer, mut reader) = stream_pipe(1);
        let monitor = writer.monitor();
        let downloader = Downloader::new(store, ObjectLocation::new("src", "bad%zzkey"));

        let result = downloader.run(writer, CancellationToken::new()).await;

        assert!(result.unwrap_err().is_decode());
        assert!(memory.fetch_log().is_empty());
        assert_eq!(monitor.write_closes(), 1);
        assert_eq!(monitor.bytes_written(), 0);
        assert!(reader.read_chunk().await.unwrap_err().is_decode());
        reader.close();
    }

    #[tokio::test]
    async fn test_fetch_error_mid_stream() {
        let (memory, store) = setup("a.txt", "0123456789");
        memory.inject_fetch_fault(
            &ObjectLocation::new("src", "a.txt"),
            FetchFault::After {
                bytes: 5,
                message: "connection reset".to_string(),
            },
        );
        let (writer, mut reader) = stream_pipe(4);
        let downloader = Downloader::new(store, ObjectLocation::new("src", "a.txt"));

        let result = downloader.run(writer, CancellationToken::new()).await;

        assert!(result.unwrap_err().is_fetch());
        assert_eq!(reader.read_chunk().await.unwrap().unwrap(), "01234");
        assert!(reader.read_chunk().await.unwrap_err().is_fetch());
        reader.close();
    }

    #[tokio::test]
    async fn test_cancellation_closes_writer() {
        let (memory, store) = setup("a.txt", "0123456789");
        memory.inject_fetch_fault(&ObjectLocation::new("src", "a.txt"), FetchFault::Stall { bytes: 0 });
        let (writer, mut reader) = stream_pipe(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            Downloader::new(store, ObjectLocation::new("src", "a.txt")).run(writer, cancel.clone()),
        );

        cancel.cancel();

        assert!(task.await.unwrap().unwrap_err().is_cancelled());
        assert!(reader.read_chunk().await.unwrap_err().is_cancelled());
        assert_eq!(memory.in_flight(), 0);
        reader.close();
    }
}
