//! Object relay pipeline
//!
//! A transfer runs two tasks joined by a bounded [`pipe`](crate::pipe): a
//! [`Downloader`] streams the source object into the pipe's write end while an
//! [`Uploader`] streams the read end into the destination. Whichever side
//! fails first closes its end with the error, which unblocks and fails the
//! other side. The [`TransferOrchestrator`] joins both tasks and reports one
//! [`TransferOutcome`]; a [`BatchRunner`] drives it over many requests.

pub mod batch;
pub mod downloader;
pub mod error;
pub mod keys;
pub mod orchestrator;
pub mod request;
pub mod uploader;

pub use batch::{BatchRunner, BatchSummary};
pub use downloader::Downloader;
pub use error::{TransferError, TransferResult};
pub use keys::decode_source_key;
pub use orchestrator::{TransferOptions, TransferOrchestrator, TransferState};
pub use request::{TransferOutcome, TransferRequest};
pub use uploader::Uploader;
