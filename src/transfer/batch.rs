//! Sequential execution of a batch of transfer requests

use super::orchestrator::TransferOrchestrator;
use super::request::{TransferOutcome, TransferRequest};
use super::TransferError;
use crate::config::ErrorMode;
use serde::Serialize;
use tracing::{info, warn};

/// Totals for one batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub bytes_transferred: u64,

    #[serde(skip)]
    pub outcomes: Vec<TransferOutcome>,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, outcome: TransferOutcome) {
        self.attempted += 1;
        if outcome.is_success() {
            self.succeeded += 1;
            self.bytes_transferred += outcome.bytes_transferred;
        } else {
            self.failed += 1;
        }
        self.outcomes.push(outcome);
    }

    /// Errors of the failed transfers, in request order
    pub fn errors(&self) -> impl Iterator<Item = &TransferError> {
        self.outcomes.iter().filter_map(|o| o.error.as_ref())
    }
}

/// Runs requests one after another, in the order given
pub struct BatchRunner {
    orchestrator: TransferOrchestrator,
    error_mode: ErrorMode,
}

impl BatchRunner {
    pub fn new(orchestrator: TransferOrchestrator, error_mode: ErrorMode) -> Self {
        Self {
            orchestrator,
            error_mode,
        }
    }

    pub fn orchestrator(&self) -> &TransferOrchestrator {
        &self.orchestrator
    }

    /// Run every request
    ///
    /// With [`ErrorMode::Abort`] the first failure ends the batch and is
    /// returned; later requests are never started. With [`ErrorMode::Skip`]
    /// every request is attempted and failures are counted in the summary.
    /// Requests not yet started when the cancellation token fires are not
    /// attempted.
    pub async fn run(&self, requests: Vec<TransferRequest>) -> Result<BatchSummary, TransferError> {
        let total = requests.len();
        let mut summary = BatchSummary::default();

        for (index, request) in requests.iter().enumerate() {
            if self.orchestrator.cancellation_token().is_cancelled() {
                warn!(remaining = total - index, "Batch cancelled, skipping remaining transfers");
                return Err(TransferError::Cancelled("batch cancelled".to_string()));
            }

            let outcome = self.orchestrator.transfer(request).await;
            if let Some(error) = outcome.error.clone() {
                if self.error_mode == ErrorMode::Abort {
                    warn!(
                        index,
                        remaining = total - index - 1,
                        "Aborting batch after failed transfer"
                    );
                    return Err(error);
                }
            }
            summary.record(outcome);
        }

        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            bytes = summary.bytes_transferred,
            "Batch finished"
        );
        Ok(summary)
    }
}
