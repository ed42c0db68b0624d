//! Usage flag types.

use crate::clock::end_of_month;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use trial_identity::Fingerprint;

/// Prefix of every usage-flag key.
pub const FLAG_KEY_PREFIX: &str = "freetrial_used_";

/// Storage key of a usage flag: `freetrial_used_<fingerprint>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagKey(String);

impl FlagKey {
    pub fn for_fingerprint(fingerprint: &Fingerprint) -> Self {
        Self(format!("{}{}", FLAG_KEY_PREFIX, fingerprint))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Marker that a fingerprint has claimed its trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageFlag {
    pub key: FlagKey,
    pub fingerprint: Fingerprint,
    /// When the claim was made.
    pub timestamp: DateTime<Utc>,
    /// End of the calendar month of `timestamp`.
    pub expires_at: DateTime<Utc>,
}

impl UsageFlag {
    pub fn new(fingerprint: Fingerprint, now: DateTime<Utc>) -> Self {
        Self {
            key: FlagKey::for_fingerprint(&fingerprint),
            fingerprint,
            timestamp: now,
            expires_at: end_of_month(now),
        }
    }

    /// ISO-8601 timestamp as written to string-valued backends.
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339()
    }
}

/// Physical storage substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Ephemeral,
    Session,
    Cookie,
    IndexedRecord,
    Cache,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Ephemeral => "ephemeral",
            BackendKind::Session => "session",
            BackendKind::Cookie => "cookie",
            BackendKind::IndexedRecord => "indexed-record",
            BackendKind::Cache => "cache",
        };
        f.write_str(name)
    }
}

/// Per-backend result of a flag lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FlagPresence {
    Found,
    Missing,
    Failed { error: String },
}

/// Lookup outcome for one backend.
#[derive(Debug, Clone, Serialize)]
pub struct BackendReading {
    pub backend: BackendKind,
    #[serde(flatten)]
    pub presence: FlagPresence,
}

/// Outcome of a fan-out write.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WriteReport {
    pub succeeded: Vec<BackendKind>,
    pub failed: Vec<(BackendKind, String)>,
}

impl WriteReport {
    /// True if at least one backend holds the flag.
    pub fn any_succeeded(&self) -> bool {
        !self.succeeded.is_empty()
    }
}
