//! Orchestrator error types.

use abuse_signals::ProbeError;
use thiserror::Error;

/// Unexpected failure during a trial attempt.
///
/// These never reach the visitor verbatim; they become a generic
/// [`TrialOutcome::Error`](crate::TrialOutcome::Error).
#[derive(Error, Debug)]
pub enum TrialError {
    #[error("{operation} is not valid in state {state}")]
    OutOfOrder {
        operation: &'static str,
        state: &'static str,
    },

    #[error("{0} called while another step is in progress")]
    Busy(&'static str),

    #[error("Detector setup failed: {0}")]
    Detector(#[from] ProbeError),
}

/// Result type alias for orchestrator errors.
pub type TrialResult<T> = Result<T, TrialError>;
