//! Evidence-gathering probes.

mod client;
mod latency;
mod webrtc;

pub use client::{ClientSignalProbe, AUTOMATION_GLOBALS};
pub use latency::{score_latencies, LatencyProbe, LatencySummary};
pub use webrtc::{
    classify_candidates, CandidateSummary, NoPeerConnections, PeerConnection,
    PeerConnectionFactory, WebRtcProbe,
};

use crate::error::ProbeError;
use crate::types::{SignalChannel, SignalReading};
use async_trait::async_trait;

/// A single evidence channel.
///
/// The built-in probes always return `Ok`, turning their own failures into
/// low-risk readings. The `Result` lets the aggregator isolate probes that
/// do not.
#[async_trait]
pub trait Probe: Send + Sync {
    fn channel(&self) -> SignalChannel;

    async fn probe(&self) -> Result<SignalReading, ProbeError>;
}
