//! End-to-end trial attempts through real detectors and the standard backends.

use abuse_signals::{
    AbuseDetector, ClientEnvironment, ClientSignalProbe, DetectionConfig, DetectionMode,
    PeerConnection, PeerConnectionFactory, Probe, ProbeError, ScreenSize, SignalAggregator,
    SignalChannel, SignalReading, Verdict, WebRtcConfig, WebRtcProbe,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use mockall::mock;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use trial_gate::{
    BlockReason, ConsentDecision, EmailCheck, TrialOrchestrator, TrialOutcome, TrialRequest,
    TrialState,
};
use trial_identity::{identify, Digester, EmailPolicy, EmailValidation};
use usage_store::{Clock, FixedClock, UsageConsensusStore};

mock! {
    pub Detector {}

    #[async_trait]
    impl AbuseDetector for Detector {
        async fn detect(&self) -> Verdict;
    }
}

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

/// Latency probe stand-in for a fast residential line.
struct QuietLatency;

#[async_trait]
impl Probe for QuietLatency {
    fn channel(&self) -> SignalChannel {
        SignalChannel::Latency
    }

    async fn probe(&self) -> Result<SignalReading, ProbeError> {
        Ok(SignalReading::new(
            SignalChannel::Latency,
            0,
            "normal",
            json!({ "samples_ms": [38, 41, 52] }),
        ))
    }
}

const HOME: &[&str] = &[
    "candidate:1 1 udp 2122260223 192.168.1.50 50000 typ host",
    "candidate:2 1 udp 1686052607 198.51.100.77 50000 typ srflx raddr 192.168.1.50 rport 50000",
];
const VPN: &[&str] = &[
    "candidate:1 1 udp 1686052607 185.220.101.4 50123 typ srflx raddr 0.0.0.0 rport 0",
    "candidate:2 1 udp 41885439 91.219.236.12 3478 typ relay raddr 0.0.0.0 rport 0",
];

fn october() -> Arc<dyn Clock> {
    Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 10, 16, 14, 0, 0).unwrap()))
}

fn aggregator(candidates: &[&'static str]) -> Arc<dyn AbuseDetector> {
    let webrtc_config = WebRtcConfig {
        gather_timeout: Duration::from_millis(200),
        ..WebRtcConfig::default()
    };
    let client = ClientEnvironment {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) Safari/605.1.15".into(),
        plugin_count: 5,
        timezone: Some("America/New_York".into()),
        language: Some("en-US".into()),
        screen: Some(ScreenSize {
            width: 1512,
            height: 982,
        }),
        ..ClientEnvironment::default()
    };

    let probes: Vec<Arc<dyn Probe>> = vec![
        Arc::new(WebRtcProbe::new(
            Arc::new(ScriptedPeers(candidates.to_vec())),
            &webrtc_config,
        )),
        Arc::new(QuietLatency),
        Arc::new(ClientSignalProbe::new(client)),
    ];
    Arc::new(SignalAggregator::new(probes, &DetectionConfig::default()))
}

fn gate(detector: Arc<dyn AbuseDetector>, indexed: &Path) -> TrialOrchestrator {
    gate_with_policy(detector, indexed, EmailPolicy::default())
}

fn gate_with_policy(
    detector: Arc<dyn AbuseDetector>,
    indexed: &Path,
    policy: EmailPolicy,
) -> TrialOrchestrator {
    let store = UsageConsensusStore::standard(october(), indexed);
    TrialOrchestrator::new(detector, store, policy)
}

async fn open_form(gate: &TrialOrchestrator) {
    assert_eq!(gate.start().await, TrialOutcome::ConsentRequired);
    assert_eq!(
        gate.resolve_consent(ConsentDecision::Granted).await,
        TrialOutcome::AwaitingInput
    );
}

#[tokio::test]
async fn test_new_visitor_is_issued_monthly_key() {
    let dir = TempDir::new().unwrap();
    let gate = gate(aggregator(HOME), &dir.path().join("usage.json"));

    open_form(&gate).await;
    let outcome = gate
        .submit(TrialRequest::new("new@company.com").with_destination("discord"))
        .await;

    let expected_key = format!("FreeTrial-OCT2026-{}", identify("new@company.com"));
    match outcome {
        TrialOutcome::Issued {
            key,
            destination,
            flags_written,
        } => {
            assert_eq!(key.as_str(), expected_key);
            assert_eq!(key.as_str(), "FreeTrial-OCT2026-e16490c8");
            assert_eq!(destination.as_deref(), Some("discord"));
            assert_eq!(flags_written, 5);
        }
        other => panic!("expected issued, got {:?}", other),
    }
    assert!(matches!(gate.state().await, TrialState::Issued { .. }));

    let verdict = gate.last_verdict().await.unwrap();
    assert_eq!(verdict.total_score, 0);
    assert!(!verdict.is_suspicious);
}

#[tokio::test]
async fn test_second_claim_same_month_is_blocked() {
    let dir = TempDir::new().unwrap();
    let gate = gate(aggregator(HOME), &dir.path().join("usage.json"));

    open_form(&gate).await;
    assert!(matches!(
        gate.submit(TrialRequest::new("new@company.com")).await,
        TrialOutcome::Issued { .. }
    ));

    // consent is remembered, so the second attempt goes straight to the form
    assert_eq!(gate.start().await, TrialOutcome::AwaitingInput);
    assert_eq!(
        gate.submit(TrialRequest::new("  NEW@company.com")).await,
        TrialOutcome::Blocked {
            reason: BlockReason::AlreadyUsed,
            retry_after: None,
        }
    );
}

#[tokio::test]
async fn test_claim_survives_losing_every_in_memory_backend() {
    let dir = TempDir::new().unwrap();
    let indexed = dir.path().join("usage.json");

    let first = gate(aggregator(HOME), &indexed);
    open_form(&first).await;
    first
        .submit(TrialRequest::new("first.last+promo@gmail.com"))
        .await;

    // fresh process: only the on-disk record store remembers the claim
    let second = gate(aggregator(HOME), &indexed);
    open_form(&second).await;
    assert_eq!(
        second.validate_email("firstlast@gmail.com").await,
        EmailCheck::AlreadyUsed
    );
    assert!(matches!(
        second.submit(TrialRequest::new("firstlast@gmail.com")).await,
        TrialOutcome::Blocked {
            reason: BlockReason::AlreadyUsed,
            ..
        }
    ));
}

#[tokio::test]
async fn test_vpn_candidates_block_before_consent() {
    let dir = TempDir::new().unwrap();
    let gate = gate(aggregator(VPN), &dir.path().join("usage.json"))
        .with_block_cooldown(Duration::from_secs(300));

    let outcome = gate.start().await;
    assert_eq!(
        outcome,
        TrialOutcome::Blocked {
            reason: BlockReason::Vpn,
            retry_after: Some(Duration::from_secs(300)),
        }
    );

    let verdict = gate.last_verdict().await.unwrap();
    assert!(verdict.total_score >= 60);
    assert_eq!(
        verdict.reading(SignalChannel::Webrtc).unwrap().reason,
        "no_local_ip,multiple_public_ips"
    );

    // the form was never opened
    let late = gate.submit(TrialRequest::new("new@company.com")).await;
    assert!(matches!(late, TrialOutcome::Error { .. }));
}

#[tokio::test]
async fn test_disposable_domain_rejected_regardless_of_store() {
    let dir = TempDir::new().unwrap();
    let indexed = dir.path().join("usage.json");

    let mut detector = MockDetector::new();
    detector.expect_detect().times(2).returning(|| Verdict {
        mode: DetectionMode::Scored,
        is_suspicious: false,
        total_score: 0,
        readings: vec![],
    });
    let gate = gate(Arc::new(detector), &indexed);

    let store = UsageConsensusStore::standard(october(), &indexed);
    let expected = TrialOutcome::Invalid {
        reason: EmailValidation::DisposableDomain,
    };

    open_form(&gate).await;
    assert_eq!(
        gate.submit(TrialRequest::new("throwaway@mailinator.com")).await,
        expected
    );
    assert_eq!(gate.state().await, TrialState::AwaitingFormInput);

    // a flag for the same address changes nothing
    store.mark_used(&identify("throwaway@mailinator.com")).await;
    assert_eq!(gate.start().await, TrialOutcome::AwaitingInput);
    assert_eq!(
        gate.submit(TrialRequest::new("throwaway@mailinator.com")).await,
        expected
    );
    assert!(!store.is_used(&identify("other@company.com")).await);
}

#[tokio::test]
async fn test_rolling_digester_issues_and_blocks() {
    let dir = TempDir::new().unwrap();
    let indexed = dir.path().join("usage.json");
    let policy = EmailPolicy::default().with_digester(Digester::Rolling);
    let gate = gate_with_policy(aggregator(HOME), &indexed, policy);

    open_form(&gate).await;
    match gate.submit(TrialRequest::new("new@company.com")).await {
        TrialOutcome::Issued {
            key, flags_written, ..
        } => {
            assert_eq!(key.as_str(), "FreeTrial-OCT2026-65bab1f0");
            assert_eq!(flags_written, 5);
        }
        other => panic!("expected issued, got {:?}", other),
    }

    let raw = std::fs::read_to_string(&indexed).unwrap();
    let data: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let ids: Vec<&String> = data["records"].as_object().unwrap().keys().collect();
    assert_eq!(ids, vec!["freetrial_used_65bab1f0"]);
    let suffix = ids[0].strip_prefix("freetrial_used_").unwrap();
    assert_eq!(suffix.len(), 8);
    assert!(suffix.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    assert_ne!(suffix, identify("new@company.com").as_str());

    assert_eq!(gate.start().await, TrialOutcome::AwaitingInput);
    assert_eq!(
        gate.validate_email(" New@Company.com").await,
        EmailCheck::AlreadyUsed
    );
    assert_eq!(
        gate.submit(TrialRequest::new("NEW@company.com")).await,
        TrialOutcome::Blocked {
            reason: BlockReason::AlreadyUsed,
            retry_after: None,
        }
    );
}
