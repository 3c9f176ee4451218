//! Bounded single-producer/single-consumer byte pipe
//!
//! A [`stream_pipe`] joins the downloader and uploader of one transfer. The
//! write end suspends once `capacity` chunks are buffered, which throttles
//! the fetch rate to the put rate and keeps memory proportional to the chunk
//! size, whatever the object size.
//!
//! Each end is closed exactly once: the `close*` methods consume the end, and
//! an end dropped without an explicit close (panic, abort, cancelled future)
//! closes itself with [`TransferError::PipeBroken`]. A close carries its error,
//! if any, to the other end:
//!
//! - write end closed cleanly: reads drain buffered chunks, then report EOF
//! - write end closed with an error: reads drain buffered chunks, then fail
//!   with that error
//! - read end closed: pending and future writes fail immediately with the
//!   reader's error, or `PipeBroken`

use crate::transfer::{TransferError, TransferResult};
use bytes::{Buf, Bytes};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

/// Default number of chunks the pipe buffers before writes suspend
pub const DEFAULT_PIPE_CAPACITY: usize = 4;

#[derive(Debug, Default)]
struct Shared {
    write_closed: AtomicBool,
    read_closed: AtomicBool,
    write_closes: AtomicUsize,
    read_closes: AtomicUsize,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    write_error: Mutex<Option<TransferError>>,
    read_error: Mutex<Option<TransferError>>,
}

impl Shared {
    fn write_error(&self) -> Option<TransferError> {
        lock(&self.write_error).clone()
    }

    fn read_error(&self) -> Option<TransferError> {
        lock(&self.read_error).clone()
    }

    /// Error a writer sees once the read end is gone
    fn reader_gone(&self) -> TransferError {
        self.read_error()
            .unwrap_or_else(|| TransferError::PipeBroken("read end closed".to_string()))
    }
}

fn lock(slot: &Mutex<Option<TransferError>>) -> std::sync::MutexGuard<'_, Option<TransferError>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Create a pipe buffering at most `capacity` chunks (minimum 1)
pub fn stream_pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared::default());

    let writer = PipeWriter {
        tx: Some(tx),
        shared: shared.clone(),
    };
    let reader = PipeReader {
        rx: Some(rx),
        pending: Bytes::new(),
        shared,
    };
    (writer, reader)
}

/// Write end of a pipe
#[derive(Debug)]
pub struct PipeWriter {
    tx: Option<mpsc::Sender<Bytes>>,
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Write one chunk, suspending while the pipe is full
    ///
    /// Returns the number of bytes written. Empty chunks are accepted and
    /// ignored.
    ///
    /// # Errors
    ///
    /// Fails fast once the read end is closed, with the error the reader
    /// closed with, or `PipeBroken` if it closed without one.
    pub async fn write(&mut self, data: Bytes) -> TransferResult<usize> {
        if self.shared.read_closed.load(Ordering::SeqCst) {
            return Err(self.shared.reader_gone());
        }
        if data.is_empty() {
            return Ok(0);
        }

        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| TransferError::PipeBroken("write end closed".to_string()))?;

        let len = data.len();
        tx.send(data).await.map_err(|_| self.shared.reader_gone())?;
        self.shared
            .bytes_written
            .fetch_add(len as u64, Ordering::SeqCst);
        Ok(len)
    }

    /// Copy `data` into a new chunk and write it
    pub async fn write_all(&mut self, data: &[u8]) -> TransferResult<usize> {
        self.write(Bytes::copy_from_slice(data)).await
    }

    /// Bytes accepted by this end so far
    pub fn bytes_written(&self) -> u64 {
        self.shared.bytes_written.load(Ordering::SeqCst)
    }

    /// Observer for this pipe's close state
    pub fn monitor(&self) -> PipeMonitor {
        PipeMonitor {
            shared: self.shared.clone(),
        }
    }

    /// Close cleanly: the reader drains what is buffered, then sees EOF
    pub fn close(mut self) {
        self.finish(None);
    }

    /// Close with an error: the reader drains what is buffered, then sees `error`
    pub fn close_with_error(mut self, error: TransferError) {
        self.finish(Some(error));
    }

    fn finish(&mut self, error: Option<TransferError>) {
        if self.shared.write_closed.load(Ordering::SeqCst) {
            return;
        }
        // Error is recorded before the flag and the sender go, so the reader
        // never mistakes an aborted stream for EOF
        if let Some(error) = error {
            *lock(&self.shared.write_error) = Some(error);
        }
        self.shared.write_closed.store(true, Ordering::SeqCst);
        self.shared.write_closes.fetch_add(1, Ordering::SeqCst);
        self.tx.take();
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        if !self.shared.write_closed.load(Ordering::SeqCst) {
            tracing::debug!("pipe write end dropped without close");
            self.finish(Some(TransferError::PipeBroken(
                "write end dropped before close".to_string(),
            )));
        }
    }
}

/// Read end of a pipe
#[derive(Debug)]
pub struct PipeReader {
    rx: Option<mpsc::Receiver<Bytes>>,
    pending: Bytes,
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Read the next chunk
    ///
    /// Returns `Ok(None)` at end-of-stream, which only happens when the write
    /// end was closed cleanly.
    pub async fn read_chunk(&mut self) -> TransferResult<Option<Bytes>> {
        if !self.pending.is_empty() {
            return Ok(Some(std::mem::take(&mut self.pending)));
        }

        let rx = self
            .rx
            .as_mut()
            .ok_or_else(|| TransferError::PipeBroken("read end closed".to_string()))?;

        match rx.recv().await {
            Some(chunk) => {
                self.shared
                    .bytes_read
                    .fetch_add(chunk.len() as u64, Ordering::SeqCst);
                Ok(Some(chunk))
            }
            None => match self.shared.write_error() {
                Some(error) => Err(error),
                None => Ok(None),
            },
        }
    }

    /// Read into `buf`, returning the number of bytes copied (0 at EOF)
    pub async fn read(&mut self, buf: &mut [u8]) -> TransferResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut chunk = match self.read_chunk().await? {
            Some(chunk) => chunk,
            None => return Ok(0),
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        chunk.advance(n);
        self.pending = chunk;
        Ok(n)
    }

    /// Error the write end was closed with, if any
    pub fn upstream_error(&self) -> Option<TransferError> {
        self.shared.write_error()
    }

    /// Bytes handed out by this end so far
    pub fn bytes_read(&self) -> u64 {
        self.shared.bytes_read.load(Ordering::SeqCst)
    }

    /// Observer for this pipe's close state
    pub fn monitor(&self) -> PipeMonitor {
        PipeMonitor {
            shared: self.shared.clone(),
        }
    }

    /// Close cleanly; later writes fail with `PipeBroken`
    pub fn close(mut self) {
        self.finish(None);
    }

    /// Close with an error; later writes fail with `error`
    pub fn close_with_error(mut self, error: TransferError) {
        self.finish(Some(error));
    }

    fn finish(&mut self, error: Option<TransferError>) {
        if self.shared.read_closed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(error) = error {
            *lock(&self.shared.read_error) = Some(error);
        }
        self.shared.read_closed.store(true, Ordering::SeqCst);
        self.shared.read_closes.fetch_add(1, Ordering::SeqCst);
        self.pending = Bytes::new();
        if let Some(mut rx) = self.rx.take() {
            // Wakes a writer suspended on a full pipe
            rx.close();
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        if !self.shared.read_closed.load(Ordering::SeqCst) {
            tracing::debug!("pipe read end dropped without close");
            self.finish(Some(TransferError::PipeBroken(
                "read end dropped before close".to_string(),
            )));
        }
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.pending.is_empty() {
            let rx = match this.rx.as_mut() {
                Some(rx) => rx,
                None => {
                    return Poll::Ready(Err(
                        TransferError::PipeBroken("read end closed".to_string()).into_io()
                    ))
                }
            };

            match ready!(rx.poll_recv(cx)) {
                Some(chunk) => {
                    this.shared
                        .bytes_read
                        .fetch_add(chunk.len() as u64, Ordering::SeqCst);
                    this.pending = chunk;
                }
                None => {
                    return Poll::Ready(match this.shared.write_error() {
                        Some(error) => Err(error.into_io()),
                        None => Ok(()),
                    })
                }
            }
        }

        let n = this.pending.len().min(buf.remaining());
        buf.put_slice(&this.pending[..n]);
        this.pending.advance(n);
        Poll::Ready(Ok(()))
    }
}

/// Read-only view of a pipe's close state
///
/// Outlives both ends, so it can be inspected after a transfer returns.
#[derive(Debug, Clone)]
pub struct PipeMonitor {
    shared: Arc<Shared>,
}

impl PipeMonitor {
    /// How many times the write end was closed
    pub fn write_closes(&self) -> usize {
        self.shared.write_closes.load(Ordering::SeqCst)
    }

    /// How many times the read end was closed
    pub fn read_closes(&self) -> usize {
        self.shared.read_closes.load(Ordering::SeqCst)
    }

    pub fn is_write_closed(&self) -> bool {
        self.shared.write_closed.load(Ordering::SeqCst)
    }

    pub fn is_read_closed(&self) -> bool {
        self.shared.read_closed.load(Ordering::SeqCst)
    }

    /// Both ends closed
    pub fn is_released(&self) -> bool {
        self.is_write_closed() && self.is_read_closed()
    }

    /// Error the write end was closed with
    pub fn write_error(&self) -> Option<TransferError> {
        self.shared.write_error()
    }

    /// Error the read end was closed with
    pub fn read_error(&self) -> Option<TransferError> {
        self.shared.read_error()
    }

    /// Bytes the reader has taken out of the pipe
    pub fn bytes_read(&self) -> u64 {
        self.shared.bytes_read.load(Ordering::SeqCst)
    }

    /// Bytes the writer has put into the pipe
    pub fn bytes_written(&self) -> u64 {
        self.shared.bytes_written.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ObjectLocation, StoreError};
    use futures::FutureExt;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn fetch_error() -> TransferError {
        TransferError::Fetch {
            location: ObjectLocation::new("src", "a.txt"),
            source: StoreError::Network("connection reset".to_string()),
        }
    }

    #[tokio::test]
    async fn test_clean_close_drains_then_eof() {
        let (mut writer, mut reader) = stream_pipe(4);
        writer.write(Bytes::from("hello ")).await.unwrap();
        writer.write(Bytes::from("world")).await.unwrap();
        writer.close();

        assert_eq!(reader.read_chunk().await.unwrap(), Some(Bytes::from("hello ")));
        assert_eq!(reader.read_chunk().await.unwrap(), Some(Bytes::from("world")));
        assert_eq!(reader.read_chunk().await.unwrap(), None);
        assert_eq!(reader.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_error_close_surfaces_error_not_eof() {
        let (mut writer, mut reader) = stream_pipe(4);
        writer.write(Bytes::from("partial")).await.unwrap();
        writer.close_with_error(fetch_error());

        assert_eq!(reader.read_chunk().await.unwrap(), Some(Bytes::from("partial")));
        assert_eq!(reader.read_chunk().await, Err(fetch_error()));
        assert_eq!(reader.upstream_error(), Some(fetch_error()));
    }

    #[tokio::test]
    async fn test_error_close_before_any_write() {
        let (writer, mut reader) = stream_pipe(1);
        writer.close_with_error(TransferError::Decode {
            key: "%zz".to_string(),
            reason: "bad escape".to_string(),
        });

        let mut buf = Vec::new();
        let err = reader.read_to_end(&mut buf).await.unwrap_err();
        assert!(buf.is_empty());
        let inner = err.get_ref().and_then(|e| e.downcast_ref::<TransferError>());
        assert!(matches!(inner, Some(TransferError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_write_blocks_when_full() {
        let (mut writer, mut reader) = stream_pipe(1);
        writer.write(Bytes::from("first")).await.unwrap();

        // Second write has no room until the reader takes the first chunk
        assert!(writer.write(Bytes::from("second")).now_or_never().is_none());

        assert_eq!(reader.read_chunk().await.unwrap(), Some(Bytes::from("first")));
        let written = tokio::time::timeout(Duration::from_secs(1), writer.write(Bytes::from("second")))
            .await
            .expect("write should proceed once the reader drained the pipe")
            .unwrap();
        assert_eq!(written, 6);
    }

    #[tokio::test]
    async fn test_reader_close_fails_blocked_writer() {
        let (mut writer, reader) = stream_pipe(1);
        writer.write(Bytes::from("fill")).await.unwrap();

        let blocked = tokio::spawn(async move {
            let result = writer.write(Bytes::from("stuck")).await;
            writer.close();
            result
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        reader.close();

        let result = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("writer must not block forever")
            .unwrap();
        assert!(matches!(result, Err(TransferError::PipeBroken(_))));
    }

    #[tokio::test]
    async fn test_reader_error_reaches_writer() {
        let (mut writer, reader) = stream_pipe(1);
        let put_error = TransferError::Put {
            location: ObjectLocation::new("dest", "a.txt"),
            source: StoreError::AccessDenied("denied".to_string()),
        };
        reader.close_with_error(put_error.clone());

        assert_eq!(writer.write(Bytes::from("data")).await, Err(put_error));
        writer.close();
    }

    #[tokio::test]
    async fn test_dropped_writer_is_broken_pipe() {
        let (writer, mut reader) = stream_pipe(1);
        let monitor = reader.monitor();
        drop(writer);

        assert!(matches!(
            reader.read_chunk().await,
            Err(TransferError::PipeBroken(_))
        ));
        assert_eq!(monitor.write_closes(), 1);
        assert!(!monitor.is_read_closed());
    }

    #[tokio::test]
    async fn test_each_end_closes_once() {
        let (writer, reader) = stream_pipe(1);
        let monitor = writer.monitor();

        writer.close();
        reader.close_with_error(TransferError::Cancelled("stop".to_string()));

        assert_eq!(monitor.write_closes(), 1);
        assert_eq!(monitor.read_closes(), 1);
        assert!(monitor.is_released());
        assert_eq!(monitor.write_error(), None);
        assert!(matches!(monitor.read_error(), Some(TransferError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_async_read_preserves_order_across_small_buffers() {
        let (mut writer, mut reader) = stream_pipe(2);
        let producer = tokio::spawn(async move {
            for i in 0..50u8 {
                writer.write(Bytes::from(vec![i; (i as usize % 7) + 1])).await?;
            }
            writer.close();
            Ok::<_, TransferError>(())
        });

        let mut received = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        producer.await.unwrap().unwrap();

        let expected: Vec<u8> = (0..50u8)
            .flat_map(|i| std::iter::repeat(i).take((i as usize % 7) + 1))
            .collect();
        assert_eq!(received, expected);
        assert_eq!(reader.bytes_read(), expected.len() as u64);
    }

    #[tokio::test]
    async fn test_empty_write_is_ignored() {
        let (mut writer, mut reader) = stream_pipe(1);
        assert_eq!(writer.write(Bytes::new()).await.unwrap(), 0);
        writer.close();
        assert_eq!(reader.read_chunk().await.unwrap(), None);
    }
}
