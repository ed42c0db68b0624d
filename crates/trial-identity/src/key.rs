//! Monthly trial keys.

use crate::fingerprint::Fingerprint;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::fmt;

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Credential granting one trial for a calendar month.
///
/// Format: `FreeTrial-<MON><YEAR>-<fingerprint>`, e.g. `FreeTrial-OCT2026-e16490c8`.
/// The same email in the same month always derives the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrialKey(String);

impl TrialKey {
    /// Derive the key for `fingerprint` in the month containing `date`.
    pub fn derive(fingerprint: &Fingerprint, date: &impl Datelike) -> Self {
        Self(format!(
            "FreeTrial-{}{}-{}",
            month_abbreviation(date),
            date.year(),
            fingerprint
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upper-case three-letter English month name.
pub fn month_abbreviation(date: &impl Datelike) -> &'static str {
    MONTHS[date.month0() as usize]
}
