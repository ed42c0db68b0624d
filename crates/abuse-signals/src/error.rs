//! Probe errors.

use std::time::Duration;
use thiserror::Error;

/// Failure inside a probe.
///
/// Probes convert these into low-risk readings at their origin; the
/// aggregator does the same for anything that still escapes.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The environment has no peer-connection capability.
    #[error("Peer connections unsupported: {0}")]
    Unsupported(String),

    /// Offer or local-description negotiation failed.
    #[error("Offer negotiation failed: {0}")]
    Negotiation(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid STUN message: {0}")]
    Stun(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),

    /// The probe task panicked or was cancelled.
    #[error("Probe task failed: {0}")]
    Task(String),

    #[error("No endpoints configured")]
    NoEndpoints,
}
