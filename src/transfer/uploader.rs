//! Destination side of a transfer: pipe read end into a store put

use super::{TransferError, TransferResult};
use crate::pipe::PipeReader;
use crate::store::{ObjectLocation, ObjectStore, PutReceipt};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, warn};

/// Streams a pipe's contents into one destination object
///
/// The destination key is used verbatim. No content type is set, so the
/// store's default applies.
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    destination: ObjectLocation,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, destination: ObjectLocation) -> Self {
        Self { store, destination }
    }

    /// Run to completion and close `reader`
    ///
    /// The read end is closed exactly once: cleanly after the put completed,
    /// or with the error that aborted it. When the put failed because the
    /// writer closed the pipe with an error, that upstream error is reported
    /// instead of a put error.
    ///
    /// Cancellation reaches the store as a failed body read, so the put
    /// always runs to its own end and cleans up what it started.
    pub async fn run(
        self,
        mut reader: PipeReader,
        cancel: CancellationToken,
    ) -> TransferResult<PutReceipt> {
        let put = {
            let mut body = CancellableBody::new(&mut reader, &cancel);
            self.store.put(&self.destination, &mut body).await
        };

        let result = put.map_err(|source| {
            if let Some(upstream) = reader.upstream_error() {
                upstream
            } else if cancel.is_cancelled() {
                TransferError::Cancelled("upload cancelled".to_string())
            } else {
                TransferError::Put {
                    location: self.destination.clone(),
                    source,
                }
            }
        });

        match &result {
            Ok(receipt) => {
                debug!(
                    destination = %self.destination,
                    bytes = receipt.bytes,
                    parts = receipt.parts,
                    "Upload complete"
                );
                reader.close();
            }
            Err(e) => {
                warn!(destination = %self.destination, error = %e, "Upload aborted");
                reader.close_with_error(e.clone());
            }
        }

        result
    }
}

/// Pipe read end that fails its next read once the token is cancelled
struct CancellableBody<'a> {
    reader: &'a mut PipeReader,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<'a> CancellableBody<'a> {
    fn new(reader: &'a mut PipeReader, cancel: &CancellationToken) -> Self {
        Self {
            reader,
            cancelled: Box::pin(cancel.clone().cancelled_owned()),
        }
    }
}

impl AsyncRead for CancellableBody<'_> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.cancelled.as_mut().poll(cx).is_ready() {
            let error = TransferError::Cancelled("upload cancelled".to_string());
            return Poll::Ready(Err(error.into_io()));
        }
        Pin::new(&mut *this.reader).poll_read(cx, buf)
    }
}
