//! Identity errors.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentityError {
    /// Fingerprint text is not exactly 8 lowercase hex characters.
    #[error("Invalid fingerprint: {0:?}")]
    InvalidFingerprint(String),
}
