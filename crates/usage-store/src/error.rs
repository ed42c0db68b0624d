//! Storage backend errors.

use thiserror::Error;

/// Failure of a single storage backend.
///
/// These never escape the consensus store: a failing backend is logged and
/// treated as "flag not found" on reads.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The storage substrate is not available in this environment.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The substrate refused the write because it is full.
    #[error("Quota exceeded ({0} entries)")]
    QuotaExceeded(usize),

    /// The call did not settle within the per-backend timeout.
    #[error("Backend timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Storage I/O error.
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed stored value.
    #[error("Invalid stored value: {0}")]
    Invalid(String),
}
