/*!
 * orbit-relay - streaming object relay between object stores
 *
 * For every request in a batch, bytes are fetched from a source object and
 * streamed straight into a destination object:
 * - Bounded in-process pipe between one download and one upload task
 * - Backpressure, strict ordering, one part in flight per side
 * - Every pipe end closed exactly once, errors carried to the other end
 * - S3 event notifications as input, sequential batches with abort or skip
 * - Pluggable object stores (AWS S3, in-memory)
 */

pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod pipe;
pub mod store;
pub mod transfer;

// Re-export commonly used types
pub use config::{ErrorMode, LogLevel, RelayConfig};
pub use error::{RelayError, Result};
pub use event::S3Event;
pub use pipe::{stream_pipe, PipeMonitor, PipeReader, PipeWriter};
pub use store::{MemoryStore, ObjectLocation, ObjectStore, StoreConfig, StoreError};
pub use transfer::{
    BatchRunner, BatchSummary, TransferError, TransferOptions, TransferOrchestrator,
    TransferOutcome, TransferRequest,
};

#[cfg(feature = "s3-native")]
pub use store::S3Store;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
