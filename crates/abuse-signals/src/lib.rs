//! Abuse signal detection for free-trial gating.
//!
//! Three independent probes look at the visitor from different angles:
//!
//! - [`WebRtcProbe`]: ICE candidates gathered through a STUN server
//! - [`LatencyProbe`]: round-trip time to high-availability endpoints
//! - [`ClientSignalProbe`]: user agent, automation hooks, timezone and screen
//!
//! [`SignalAggregator`] runs them concurrently and compares the summed score
//! with a threshold. [`LegacyVpnDetector`] is the older binary policy and is
//! selected with [`DetectionMode::Legacy`].

pub mod aggregator;
pub mod config;
pub mod error;
pub mod geolocation;
pub mod legacy;
pub mod probes;
pub mod retry;
pub mod stun;
pub mod types;

pub use aggregator::{AbuseDetector, SignalAggregator};
pub use config::{DetectionConfig, GeolocationConfig, LatencyConfig, WebRtcConfig};
pub use error::ProbeError;
pub use geolocation::{GeoInfo, GeolocationClient};
pub use legacy::LegacyVpnDetector;
pub use probes::{
    ClientSignalProbe, LatencyProbe, NoPeerConnections, PeerConnection, PeerConnectionFactory,
    Probe, WebRtcProbe,
};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use stun::StunPeerConnections;
pub use types::{
    ClientEnvironment, DetectionMode, ScreenSize, SignalChannel, SignalReading, Verdict,
};

use std::sync::Arc;
use tracing::info;

/// Build the detector selected by `config.mode`.
pub fn build_detector(
    config: &DetectionConfig,
    peers: Arc<dyn PeerConnectionFactory>,
    environment: ClientEnvironment,
) -> Result<Arc<dyn AbuseDetector>, ProbeError> {
    let webrtc: Arc<dyn Probe> = Arc::new(WebRtcProbe::new(peers, &config.webrtc));

    let detector: Arc<dyn AbuseDetector> = match config.mode {
        DetectionMode::Scored => {
            let probes: Vec<Arc<dyn Probe>> = vec![
                webrtc,
                Arc::new(LatencyProbe::new(&config.latency)),
                Arc::new(ClientSignalProbe::new(environment)),
            ];
            Arc::new(SignalAggregator::new(probes, config))
        }
        DetectionMode::Legacy => Arc::new(LegacyVpnDetector::new(
            webrtc,
            GeolocationClient::new(&config.geolocation)?,
            environment.timezone,
            config.probe_timeout,
        )),
    };

    info!(mode = ?config.mode, threshold = config.threshold, "Abuse detector ready");
    Ok(detector)
}
