//! Detection configuration.

use crate::retry::RetryPolicy;
use crate::types::DetectionMode;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Main detection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Which combination policy decides the verdict.
    #[serde(default)]
    pub mode: DetectionMode,

    /// Score at or above which a visitor is suspicious (scored mode).
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Guard timeout on each probe inside the aggregator.
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub probe_timeout: Duration,

    #[serde(default)]
    pub webrtc: WebRtcConfig,

    #[serde(default)]
    pub latency: LatencyConfig,

    #[serde(default)]
    pub geolocation: GeolocationConfig,
}

/// WebRTC ICE probe configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebRtcConfig {
    /// STUN server URL, `stun:host:port`.
    #[serde(default = "default_stun_server")]
    pub stun_server: String,

    /// How long candidates are collected.
    #[serde(default = "default_gather_timeout", with = "humantime_serde")]
    pub gather_timeout: Duration,
}

/// Latency probe configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LatencyConfig {
    /// Endpoints probed with HEAD requests. Accepts a list or a
    /// comma-separated string, as environment variables only carry strings.
    #[serde(
        default = "default_latency_endpoints",
        deserialize_with = "list_or_comma_separated"
    )]
    pub endpoints: Vec<String>,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Latency recorded for a failed or timed-out request.
    #[serde(default = "default_penalty", with = "humantime_serde")]
    pub penalty: Duration,

    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Geolocation lookup configuration (legacy detector).
#[derive(Debug, Clone, Deserialize)]
pub struct GeolocationConfig {
    /// JSON endpoint returning `{timezone, org, asn, country_code}`.
    #[serde(default = "default_geolocation_url")]
    pub url: String,

    #[serde(default = "default_geolocation_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default = "default_geolocation_retry")]
    pub retry: RetryPolicy,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            mode: DetectionMode::default(),
            threshold: default_threshold(),
            probe_timeout: default_probe_timeout(),
            webrtc: WebRtcConfig::default(),
            latency: LatencyConfig::default(),
            geolocation: GeolocationConfig::default(),
        }
    }
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_server: default_stun_server(),
            gather_timeout: default_gather_timeout(),
        }
    }
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            endpoints: default_latency_endpoints(),
            request_timeout: default_request_timeout(),
            penalty: default_penalty(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            url: default_geolocation_url(),
            timeout: default_geolocation_timeout(),
            retry: default_geolocation_retry(),
        }
    }
}

fn list_or_comma_separated<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrString {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match ListOrString::deserialize(deserializer)? {
        ListOrString::List(list) => list,
        ListOrString::Joined(joined) => joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    })
}

fn default_threshold() -> u32 {
    60
}

fn default_probe_timeout() -> Duration {
    // Latency probe worst case is request timeout x endpoints
    Duration::from_secs(15)
}

fn default_stun_server() -> String {
    "stun:stun.l.google.com:19302".into()
}

fn default_gather_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_latency_endpoints() -> Vec<String> {
    vec![
        "https://www.google.com/favicon.ico".into(),
        "https://www.cloudflare.com/favicon.ico".into(),
        "https://www.microsoft.com/favicon.ico".into(),
    ]
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(4)
}

fn default_penalty() -> Duration {
    Duration::from_millis(5000)
}

fn default_geolocation_url() -> String {
    "https://ipapi.co/json/".into()
}

fn default_geolocation_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_geolocation_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(1000))
}
