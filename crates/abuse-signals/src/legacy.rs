//! Binary OR detector kept as an alternate mode.

use crate::aggregator::{run_guarded, AbuseDetector};
use crate::geolocation::{GeoInfo, GeolocationClient};
use crate::probes::Probe;
use crate::types::{DetectionMode, SignalChannel, SignalReading, Verdict};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

const TIMEZONE_MISMATCH: u32 = 20;
const HOSTING_PROVIDER: u32 = 50;

/// Flags a visitor if ANY of three checks trips: a suspicious WebRTC reading,
/// a client timezone that differs from the IP's timezone, or a hosting
/// provider egress.
pub struct LegacyVpnDetector {
    webrtc: Arc<dyn Probe>,
    geolocation: GeolocationClient,
    client_timezone: Option<String>,
    probe_timeout: Duration,
}

impl LegacyVpnDetector {
    pub fn new(
        webrtc: Arc<dyn Probe>,
        geolocation: GeolocationClient,
        client_timezone: Option<String>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            webrtc,
            geolocation,
            client_timezone,
            probe_timeout,
        }
    }

    async fn geolocation_reading(&self) -> SignalReading {
        match self.geolocation.lookup().await {
            Ok(info) => score_geolocation(&info, self.client_timezone.as_deref()),
            Err(e) => {
                warn!("Geolocation lookup failed, treating as clean: {}", e);
                SignalReading::failed(SignalChannel::Geolocation, e)
            }
        }
    }
}

/// Score a geolocation answer against the client's own timezone.
pub fn score_geolocation(info: &GeoInfo, client_timezone: Option<&str>) -> SignalReading {
    let mut score = 0;
    let mut reasons = Vec::new();

    if let (Some(client), Some(geo)) = (client_timezone, info.timezone.as_deref()) {
        if client != geo {
            score += TIMEZONE_MISMATCH;
            reasons.push("timezone_mismatch");
        }
    }
    if info.is_hosting_provider() {
        score += HOSTING_PROVIDER;
        reasons.push("hosting_provider");
    }

    let reason = if reasons.is_empty() {
        "normal".to_string()
    } else {
        reasons.join(",")
    };

    SignalReading::new(
        SignalChannel::Geolocation,
        score,
        reason,
        json!({
            "reasons": reasons,
            "client_timezone": client_timezone,
            "geo": info,
        }),
    )
}

#[async_trait]
impl AbuseDetector for LegacyVpnDetector {
    #[instrument(skip(self))]
    async fn detect(&self) -> Verdict {
        let (webrtc, geolocation) = tokio::join!(
            run_guarded(self.webrtc.clone(), self.probe_timeout),
            self.geolocation_reading(),
        );

        let readings = vec![webrtc, geolocation];
        let is_suspicious = readings.iter().any(SignalReading::is_suspicious);
        let total_score: u32 = readings.iter().map(|r| r.score).sum();

        info!(is_suspicious, total_score, "Legacy VPN check finished");

        Verdict {
            mode: DetectionMode::Legacy,
            is_suspicious,
            total_score,
            readings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(timezone: &str, org: &str) -> GeoInfo {
        GeoInfo {
            timezone: Some(timezone.into()),
            org: Some(org.into()),
            ..GeoInfo::default()
        }
    }

    #[test]
    fn test_matching_residential() {
        let reading = score_geolocation(&info("Europe/Berlin", "Vodafone GmbH"), Some("Europe/Berlin"));
        assert_eq!(reading.score, 0);
        assert!(!reading.is_suspicious());
    }

    #[test]
    fn test_timezone_mismatch() {
        let reading = score_geolocation(&info("America/New_York", "Comcast"), Some("Europe/Berlin"));
        assert_eq!(reading.score, 20);
        assert_eq!(reading.reason, "timezone_mismatch");
    }

    #[test]
    fn test_hosting_and_mismatch() {
        let reading = score_geolocation(&info("Europe/Amsterdam", "M247 Ltd"), Some("Asia/Tokyo"));
        assert_eq!(reading.score, 70);
        assert_eq!(reading.reason, "timezone_mismatch,hosting_provider");
    }

    #[test]
    fn test_unknown_client_timezone_never_mismatches() {
        let reading = score_geolocation(&info("Europe/Paris", "Orange"), None);
        assert_eq!(reading.score, 0);
    }
}
