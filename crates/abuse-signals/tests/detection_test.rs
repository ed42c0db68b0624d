//! Integration tests for the detectors with scripted peers and mock HTTP endpoints.

use abuse_signals::{
    AbuseDetector, ClientEnvironment, ClientSignalProbe, DetectionConfig, DetectionMode,
    GeolocationClient, GeolocationConfig, LatencyConfig, LatencyProbe, LegacyVpnDetector,
    NoPeerConnections, PeerConnection, PeerConnectionFactory, Probe, ProbeError, RetryPolicy,
    ScreenSize, SignalAggregator, SignalChannel, SignalReading, WebRtcConfig, WebRtcProbe,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HOME_HOST: &str = "candidate:1 1 udp 2122260223 192.168.0.14 61002 typ host";
const HOME_SRFLX: &str =
    "candidate:2 1 udp 1686052607 198.51.100.40 61002 typ srflx raddr 192.168.0.14 rport 61002";
const VPN_A: &str = "candidate:1 1 udp 1686052607 185.220.101.4 50123 typ srflx raddr 0.0.0.0 rport 0";
const VPN_B: &str = "candidate:2 1 udp 41885439 91.219.236.12 3478 typ relay raddr 0.0.0.0 rport 0";

/// Emits a fixed candidate list and completes gathering.
struct ScriptedPeers(Vec<&'static str>);

struct ScriptedConnection(Vec<String>);

#[async_trait]
impl PeerConnection for ScriptedConnection {
    async fn start_gathering(&mut self) -> Result<mpsc::Receiver<String>, ProbeError> {
        let (tx, rx) = mpsc::channel(self.0.len().max(1));
        for candidate in self.0.drain(..) {
            tx.try_send(candidate).unwrap();
        }
        Ok(rx)
    }

    async fn close(&mut self) {}
}

impl PeerConnectionFactory for ScriptedPeers {
    fn create(&self, _stun_server: &str) -> Result<Box<dyn PeerConnection>, ProbeError> {
        Ok(Box::new(ScriptedConnection(
            self.0.iter().map(|c| c.to_string()).collect(),
        )))
    }
}

struct Panicking;

#[async_trait]
impl Probe for Panicking {
    fn channel(&self) -> SignalChannel {
        SignalChannel::Latency
    }

    async fn probe(&self) -> Result<SignalReading, ProbeError> {
        panic!("probe blew up");
    }
}

struct Failing;

#[async_trait]
impl Probe for Failing {
    fn channel(&self) -> SignalChannel {
        SignalChannel::ClientHeuristics
    }

    async fn probe(&self) -> Result<SignalReading, ProbeError> {
        Err(ProbeError::Task("environment unavailable".into()))
    }
}

fn residential_client() -> ClientEnvironment {
    ClientEnvironment {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0".into(),
        plugin_count: 3,
        timezone: Some("Europe/Berlin".into()),
        language: Some("de-DE".into()),
        screen: Some(ScreenSize {
            width: 2560,
            height: 1440,
        }),
        ..ClientEnvironment::default()
    }
}

fn webrtc(candidates: Vec<&'static str>) -> Arc<dyn Probe> {
    let config = WebRtcConfig {
        gather_timeout: Duration::from_millis(200),
        ..WebRtcConfig::default()
    };
    Arc::new(WebRtcProbe::new(Arc::new(ScriptedPeers(candidates)), &config))
}

async fn fast_latency(server: &MockServer) -> Arc<dyn Probe> {
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;

    let config = LatencyConfig {
        endpoints: vec![
            format!("{}/favicon.ico", server.uri()),
            format!("{}/other.ico", server.uri()),
        ],
        ..LatencyConfig::default()
    };
    Arc::new(LatencyProbe::new(&config))
}

#[tokio::test]
async fn test_all_neutral_probes_pass() {
    let server = MockServer::start().await;
    let probes: Vec<Arc<dyn Probe>> = vec![
        webrtc(vec![HOME_HOST, HOME_SRFLX]),
        fast_latency(&server).await,
        Arc::new(ClientSignalProbe::new(residential_client())),
    ];

    let verdict = SignalAggregator::new(probes, &DetectionConfig::default())
        .detect()
        .await;

    assert_eq!(verdict.total_score, 0);
    assert!(!verdict.is_suspicious);
    assert_eq!(verdict.mode, DetectionMode::Scored);
}

#[tokio::test]
async fn test_vpn_candidates_alone_cross_threshold() {
    let server = MockServer::start().await;
    let probes: Vec<Arc<dyn Probe>> = vec![
        webrtc(vec![VPN_A, VPN_B]),
        fast_latency(&server).await,
        Arc::new(ClientSignalProbe::new(residential_client())),
    ];

    let verdict = SignalAggregator::new(probes, &DetectionConfig::default())
        .detect()
        .await;

    let reading = verdict.reading(SignalChannel::Webrtc).unwrap();
    assert_eq!(reading.reason, "no_local_ip,multiple_public_ips");
    assert_eq!(verdict.total_score, 80);
    assert!(verdict.is_suspicious);
}

#[tokio::test]
async fn test_panicking_and_failing_probes_are_isolated() {
    let probes: Vec<Arc<dyn Probe>> = vec![
        webrtc(vec![VPN_A, VPN_B]),
        Arc::new(Panicking),
        Arc::new(Failing),
    ];

    let verdict = SignalAggregator::new(probes, &DetectionConfig::default())
        .detect()
        .await;

    assert_eq!(verdict.readings.len(), 3);
    assert_eq!(verdict.reading(SignalChannel::Webrtc).unwrap().score, 80);
    for channel in [SignalChannel::Latency, SignalChannel::ClientHeuristics] {
        let reading = verdict.reading(channel).unwrap();
        assert_eq!(reading.score, 0);
        assert_eq!(reading.reason, "probe_failed");
    }
    assert!(verdict.is_suspicious);
}

#[tokio::test]
async fn test_blocked_webrtc_resolves() {
    let probe = WebRtcProbe::new(Arc::new(NoPeerConnections), &WebRtcConfig::default());

    let reading = probe.probe().await.unwrap();
    assert_eq!(reading.score, 20);
    assert_eq!(reading.reason, "webrtc_blocked");
}

#[tokio::test]
async fn test_slow_endpoints_score_high_latency() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let config = LatencyConfig {
        endpoints: vec![
            format!("{}/a.ico", server.uri()),
            format!("{}/b.ico", server.uri()),
        ],
        request_timeout: Duration::from_millis(300),
        ..LatencyConfig::default()
    };

    let started = std::time::Instant::now();
    let reading = LatencyProbe::new(&config).probe().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(reading.score, 30);
    assert_eq!(reading.reason, "high_latency");
    assert_eq!(reading.evidence["samples_ms"], json!([5000, 5000]));
}

#[tokio::test]
async fn test_error_status_still_counts_as_answer() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = LatencyConfig {
        endpoints: vec![format!("{}/missing.ico", server.uri())],
        ..LatencyConfig::default()
    };

    let reading = LatencyProbe::new(&config).probe().await.unwrap();
    assert_eq!(reading.reason, "normal");
}

fn geolocation(server: &MockServer) -> GeolocationClient {
    GeolocationClient::new(&GeolocationConfig {
        url: format!("{}/json/", server.uri()),
        timeout: Duration::from_secs(2),
        retry: RetryPolicy::new(2, Duration::from_millis(10)),
    })
    .unwrap()
}

fn legacy(peers: Vec<&'static str>, server: &MockServer) -> LegacyVpnDetector {
    LegacyVpnDetector::new(
        webrtc(peers),
        geolocation(server),
        Some("Europe/Berlin".into()),
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn test_legacy_clean_visitor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "timezone": "Europe/Berlin",
            "org": "Deutsche Telekom AG",
            "asn": "AS3320",
            "country_code": "DE"
        })))
        .mount(&server)
        .await;

    let verdict = legacy(vec![HOME_HOST, HOME_SRFLX], &server).detect().await;

    assert_eq!(verdict.mode, DetectionMode::Legacy);
    assert!(!verdict.is_suspicious);
}

#[tokio::test]
async fn test_legacy_hosting_provider_trips_alone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "timezone": "Europe/Berlin",
            "org": "Hetzner Online GmbH",
            "asn": "AS24940",
            "country_code": "DE"
        })))
        .mount(&server)
        .await;

    let verdict = legacy(vec![HOME_HOST, HOME_SRFLX], &server).detect().await;

    assert!(verdict.is_suspicious);
    assert_eq!(
        verdict.reading(SignalChannel::Geolocation).unwrap().reason,
        "hosting_provider"
    );
}

#[tokio::test]
async fn test_legacy_lookup_failure_fails_open_after_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json/"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let verdict = legacy(vec![HOME_HOST, HOME_SRFLX], &server).detect().await;

    let geo = verdict.reading(SignalChannel::Geolocation).unwrap();
    assert_eq!(geo.reason, "probe_failed");
    assert!(!verdict.is_suspicious);
}

#[tokio::test]
async fn test_legacy_any_webrtc_score_trips() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "timezone": "Europe/Berlin"
        })))
        .mount(&server)
        .await;

    // a lone public srflx candidate scores only 35
    let verdict = legacy(vec![HOME_SRFLX], &server).detect().await;

    assert_eq!(verdict.total_score, 35);
    assert!(verdict.is_suspicious);
}
