//! WebRTC ICE candidate probe.

use super::Probe;
use crate::config::WebRtcConfig;
use crate::error::ProbeError;
use crate::types::{SignalChannel, SignalReading};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, instrument, warn};

const NO_CANDIDATES: u32 = 40;
const NO_LOCAL_IP: u32 = 35;
const MULTIPLE_PUBLIC_IPS: u32 = 45;
const WEBRTC_BLOCKED: u32 = 20;
const OFFER_FAILED: u32 = 25;

/// An open peer connection that can gather ICE candidates.
#[async_trait]
pub trait PeerConnection: Send {
    /// Create a data channel and offer, set the local description and start
    /// gathering. Candidate lines arrive on the receiver; the sender is
    /// dropped once gathering completes.
    async fn start_gathering(&mut self) -> Result<mpsc::Receiver<String>, ProbeError>;

    /// Tear the connection down. Called exactly once per probe run.
    async fn close(&mut self);
}

/// The environment's peer-connection capability.
pub trait PeerConnectionFactory: Send + Sync {
    /// Open a connection configured with a single STUN server.
    ///
    /// Returns [`ProbeError::Unsupported`] when the capability is missing.
    fn create(&self, stun_server: &str) -> Result<Box<dyn PeerConnection>, ProbeError>;
}

/// Environment without any peer-connection support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPeerConnections;

impl PeerConnectionFactory for NoPeerConnections {
    fn create(&self, _stun_server: &str) -> Result<Box<dyn PeerConnection>, ProbeError> {
        Err(ProbeError::Unsupported("no peer connection support".into()))
    }
}

/// Addresses seen in a set of ICE candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSummary {
    pub total: usize,
    pub private: BTreeSet<Ipv4Addr>,
    pub public: BTreeSet<Ipv4Addr>,
}

impl CandidateSummary {
    pub fn from_candidates<S: AsRef<str>>(candidates: &[S]) -> Self {
        let mut summary = Self {
            total: candidates.len(),
            ..Self::default()
        };

        let addresses = candidates
            .iter()
            .filter_map(|c| connection_address(c.as_ref()));

        for addr in addresses {
            if is_private(&addr) {
                summary.private.insert(addr);
            } else if is_public(&addr) {
                summary.public.insert(addr);
            }
        }

        summary
    }
}

/// The candidate's own IPv4 address.
///
/// `candidate:<foundation> <component> <transport> <priority> <address> <port> typ ...`;
/// the `raddr` related address is not the candidate's.
fn connection_address(candidate: &str) -> Option<Ipv4Addr> {
    candidate.split_whitespace().nth(4)?.parse().ok()
}

fn is_private(addr: &Ipv4Addr) -> bool {
    addr.is_private() || addr.is_loopback() || addr.is_link_local()
}

fn is_public(addr: &Ipv4Addr) -> bool {
    !addr.is_unspecified() && !addr.is_broadcast() && !addr.is_multicast()
}

/// Score a set of candidate lines with the weighted policy.
pub fn classify_candidates<S: AsRef<str>>(candidates: &[S]) -> SignalReading {
    let summary = CandidateSummary::from_candidates(candidates);
    let mut score = 0;
    let mut reasons = Vec::new();

    if summary.total == 0 {
        score += NO_CANDIDATES;
        reasons.push("no_candidates");
    } else {
        if summary.private.is_empty() {
            score += NO_LOCAL_IP;
            reasons.push("no_local_ip");
        }
        if summary.public.len() > 1 {
            score += MULTIPLE_PUBLIC_IPS;
            reasons.push("multiple_public_ips");
        }
    }

    let reason = if reasons.is_empty() {
        "normal".to_string()
    } else {
        reasons.join(",")
    };

    SignalReading::new(
        SignalChannel::Webrtc,
        score,
        reason,
        json!({
            "candidates": summary.total,
            "private_ips": summary.private.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
            "public_ips": summary.public.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
            "reasons": reasons,
        }),
    )
}

/// Inspects ICE candidates for signs of VPN or relayed egress.
pub struct WebRtcProbe {
    factory: Arc<dyn PeerConnectionFactory>,
    stun_server: String,
    gather_timeout: Duration,
}

impl WebRtcProbe {
    pub fn new(factory: Arc<dyn PeerConnectionFactory>, config: &WebRtcConfig) -> Self {
        Self {
            factory,
            stun_server: config.stun_server.clone(),
            gather_timeout: config.gather_timeout,
        }
    }

    /// Override the gathering window.
    pub fn with_gather_timeout(mut self, gather_timeout: Duration) -> Self {
        self.gather_timeout = gather_timeout;
        self
    }

    async fn collect(&self, rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let deadline = Instant::now() + self.gather_timeout;
        let mut candidates = Vec::new();

        loop {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(candidate)) => {
                    debug!(candidate = %candidate, "ICE candidate");
                    candidates.push(candidate);
                }
                Ok(None) => {
                    debug!("ICE gathering complete");
                    break;
                }
                Err(_) => {
                    debug!("ICE gathering window elapsed");
                    break;
                }
            }
        }

        candidates
    }
}

#[async_trait]
impl Probe for WebRtcProbe {
    fn channel(&self) -> SignalChannel {
        SignalChannel::Webrtc
    }

    #[instrument(skip(self), fields(stun = %self.stun_server))]
    async fn probe(&self) -> Result<SignalReading, ProbeError> {
        let mut connection = match self.factory.create(&self.stun_server) {
            Ok(connection) => connection,
            Err(ProbeError::Unsupported(e)) => {
                debug!("WebRTC unavailable: {}", e);
                return Ok(SignalReading::new(
                    SignalChannel::Webrtc,
                    WEBRTC_BLOCKED,
                    "webrtc_blocked",
                    json!({ "error": e }),
                ));
            }
            Err(e) => return Ok(offer_failed(e)),
        };

        let mut rx = match connection.start_gathering().await {
            Ok(rx) => rx,
            Err(e) => {
                connection.close().await;
                return Ok(offer_failed(e));
            }
        };

        let candidates = self.collect(&mut rx).await;
        connection.close().await;

        let reading = classify_candidates(&candidates);
        debug!(score = reading.score, reason = %reading.reason, "WebRTC probe finished");
        Ok(reading)
    }
}

fn offer_failed(error: ProbeError) -> SignalReading {
    warn!("WebRTC offer failed: {}", error);
    SignalReading::new(
        SignalChannel::Webrtc,
        OFFER_FAILED,
        "offer_failed",
        json!({ "error": error.to_string() }),
    )
}
