//! Runs one transfer: a pipe, a downloader and an uploader, joined

use super::downloader::Downloader;
use super::request::{TransferOutcome, TransferRequest};
use super::uploader::Uploader;
use super::TransferError;
use crate::config::RelayConfig;
use crate::pipe::{stream_pipe, DEFAULT_PIPE_CAPACITY};
use crate::store::{ObjectStore, PutReceipt};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Tuning for individual transfers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// Chunks buffered between downloader and uploader
    pub pipe_capacity: usize,

    /// Cancel a transfer that runs longer than this
    pub timeout: Option<Duration>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            timeout: None,
        }
    }
}

impl TransferOptions {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            pipe_capacity: config.pipe_capacity,
            timeout: config.transfer_timeout_seconds.map(Duration::from_secs),
        }
    }
}

/// Lifecycle of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Idle => "idle",
            TransferState::Running => "running",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
        };
        f.write_str(name)
    }
}

enum TaskReport {
    Downloaded(Result<u64, TransferError>),
    Uploaded(Result<PutReceipt, TransferError>),
}

/// Relays single objects from a source to a destination
///
/// Both sides of every transfer use the store given at construction. Each
/// call to [`transfer`](Self::transfer) owns its pipe and its two tasks; when
/// it returns both tasks have finished and both pipe ends are closed. If the
/// returned future is dropped early, the tasks are aborted with it.
pub struct TransferOrchestrator {
    store: Arc<dyn ObjectStore>,
    options: TransferOptions,
    cancel: CancellationToken,
}

impl TransferOrchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, options: TransferOptions) -> Self {
        Self {
            store,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Token that cancels the running transfer and every later one
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Relay one object
    ///
    /// Never returns an error directly: failures are reported in the
    /// outcome, after both tasks have been joined.
    pub async fn transfer(&self, request: &TransferRequest) -> TransferOutcome {
        let span = info_span!(
            "transfer",
            source = %request.source,
            destination = %request.destination
        );
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: &TransferRequest) -> TransferOutcome {
        let started = Instant::now();
        let mut state = TransferState::Idle;
        info!(
            event_source = %request.event_source,
            event_time = ?request.event_time,
            "Starting transfer"
        );

        let cancel = self.cancel.child_token();
        let (writer, reader) = stream_pipe(self.options.pipe_capacity);
        let monitor = writer.monitor();

        let downloader = Downloader::new(self.store.clone(), request.source.clone());
        let uploader = Uploader::new(self.store.clone(), request.destination.clone());

        let mut tasks = JoinSet::new();
        let token = cancel.clone();
        tasks.spawn(
            async move { TaskReport::Downloaded(downloader.run(writer, token).await) }
                .in_current_span(),
        );
        let token = cancel.clone();
        tasks.spawn(
            async move { TaskReport::Uploaded(uploader.run(reader, token).await) }
                .in_current_span(),
        );
        state = transition(state, TransferState::Running);

        let deadline = async {
            match self.options.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);
        let mut deadline_passed = false;

        let mut first_error: Option<TransferError> = None;
        let mut downloaded = 0u64;
        let mut receipt: Option<PutReceipt> = None;

        loop {
            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                _ = &mut deadline, if !deadline_passed => {
                    deadline_passed = true;
                    warn!(timeout = ?self.options.timeout, "Transfer deadline passed, cancelling");
                    cancel.cancel();
                    continue;
                }
            };

            let report = match joined {
                Some(Ok(report)) => report,
                Some(Err(join_error)) => {
                    error!(error = %join_error, "Transfer task did not finish normally");
                    first_error.get_or_insert(TransferError::TaskFailed(join_error.to_string()));
                    // The surviving task is unblocked by the dropped pipe end; cancelling makes it prompt
                    cancel.cancel();
                    continue;
                }
                None => break,
            };

            match report {
                TaskReport::Downloaded(Ok(bytes)) => downloaded = bytes,
                TaskReport::Uploaded(Ok(put)) => receipt = Some(put),
                TaskReport::Downloaded(Err(e)) | TaskReport::Uploaded(Err(e)) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if deadline_passed {
            if let Some(TransferError::Cancelled(_)) = first_error {
                first_error = Some(TransferError::Cancelled(format!(
                    "transfer exceeded deadline of {:?}",
                    self.options.timeout.unwrap_or_default()
                )));
            }
        }

        debug_assert!(monitor.is_released(), "pipe ends must be closed once both tasks are joined");
        debug!(
            write_closes = monitor.write_closes(),
            read_closes = monitor.read_closes(),
            "Pipe released"
        );

        let duration = started.elapsed();
        match (first_error, receipt) {
            (None, Some(receipt)) => {
                if receipt.bytes != downloaded {
                    warn!(
                        downloaded,
                        uploaded = receipt.bytes,
                        "Uploaded byte count differs from downloaded byte count"
                    );
                }
                transition(state, TransferState::Completed);
                info!(
                    bytes = receipt.bytes,
                    parts = receipt.parts,
                    elapsed_ms = duration.as_millis() as u64,
                    "Transfer completed"
                );
                TransferOutcome {
                    source: request.source.clone(),
                    destination: request.destination.clone(),
                    bytes_transferred: receipt.bytes,
                    parts: receipt.parts,
                    error: None,
                    duration,
                }
            }
            (error, _) => {
                let error = error.unwrap_or_else(|| {
                    TransferError::TaskFailed("upload finished without a receipt".to_string())
                });
                transition(state, TransferState::Failed);
                error!(kind = error.kind(), error = %error, "Transfer failed");
                TransferOutcome {
                    source: request.source.clone(),
                    destination: request.destination.clone(),
                    bytes_transferred: monitor.bytes_read(),
                    parts: 0,
                    error: Some(error),
                    duration,
                }
            }
        }
    }
}

fn transition(from: TransferState, to: TransferState) -> TransferState {
    debug!(%from, %to, "Transfer state change");
    to
}
