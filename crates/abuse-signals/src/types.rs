//! Signal readings, verdicts and client environment.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Evidence channel a reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalChannel {
    Webrtc,
    Latency,
    ClientHeuristics,
    Geolocation,
}

impl fmt::Display for SignalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalChannel::Webrtc => "webrtc",
            SignalChannel::Latency => "latency",
            SignalChannel::ClientHeuristics => "clientHeuristics",
            SignalChannel::Geolocation => "geolocation",
        };
        f.write_str(name)
    }
}

/// One probe's result. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalReading {
    pub channel: SignalChannel,
    /// Risk points; 0 means nothing suspicious was seen.
    pub score: u32,
    pub reason: String,
    pub evidence: Value,
}

impl SignalReading {
    pub fn new(channel: SignalChannel, score: u32, reason: impl Into<String>, evidence: Value) -> Self {
        Self {
            channel,
            score,
            reason: reason.into(),
            evidence,
        }
    }

    /// Zero-risk reading for a probe that failed.
    pub fn failed(channel: SignalChannel, error: impl fmt::Display) -> Self {
        Self::new(
            channel,
            0,
            "probe_failed",
            serde_json::json!({ "error": error.to_string() }),
        )
    }

    /// Binary view of the reading.
    pub fn is_suspicious(&self) -> bool {
        self.score > 0
    }
}

/// How readings are combined into a verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Weighted sum against a threshold.
    #[default]
    Scored,
    /// OR of WebRTC, geolocation timezone and hosting-provider checks.
    Legacy,
}

/// Decision of one detection run plus the readings behind it.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub mode: DetectionMode,
    pub is_suspicious: bool,
    pub total_score: u32,
    pub readings: Vec<SignalReading>,
}

impl Verdict {
    pub fn reading(&self, channel: SignalChannel) -> Option<&SignalReading> {
        self.readings.iter().find(|r| r.channel == channel)
    }
}

/// Screen dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// What the UI glue reports about the visitor's execution environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientEnvironment {
    pub user_agent: String,
    /// `navigator.webdriver`-style driver flag.
    pub webdriver: bool,
    /// Names of globals present in the page, checked against known automation hooks.
    pub globals: Vec<String>,
    /// `webdriver` attribute set on the root document element.
    pub document_webdriver_attribute: bool,
    pub plugin_count: u32,
    /// IANA timezone, e.g. `Europe/Berlin`.
    pub timezone: Option<String>,
    /// BCP 47 language tag, e.g. `de-DE`.
    pub language: Option<String>,
    pub screen: Option<ScreenSize>,
}
