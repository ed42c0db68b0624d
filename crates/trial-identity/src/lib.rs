//! Visitor identity for the free-trial gate.
//!
//! An email address is canonicalized, validated against format and
//! disposable-domain rules, and reduced to a short [`Fingerprint`] that is
//! used as the storage key for usage flags. The email itself is never stored.
//!
//! # Modules
//!
//! - [`email`] - canonicalization and validation
//! - [`fingerprint`] - 8-hex-character digest with a non-cryptographic fallback
//! - [`key`] - monthly trial key derivation

pub mod email;
pub mod error;
pub mod fingerprint;
pub mod key;

pub use email::{normalize, EmailPolicy, EmailValidation, DISPOSABLE_DOMAINS};
pub use error::IdentityError;
pub use fingerprint::{fingerprint, Digester, Fingerprint, FINGERPRINT_LEN};
pub use key::{month_abbreviation, TrialKey};

/// Canonicalize an email and fingerprint it with the default digester.
pub fn identify(email: &str) -> Fingerprint {
    fingerprint(&normalize(email))
}
