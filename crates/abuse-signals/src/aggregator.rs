//! Concurrent probe fan-out and weighted verdict.

use crate::config::DetectionConfig;
use crate::error::ProbeError;
use crate::probes::Probe;
use crate::types::{DetectionMode, SignalReading, Verdict};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

/// Anything that can decide whether the current visitor looks abusive.
#[async_trait]
pub trait AbuseDetector: Send + Sync {
    async fn detect(&self) -> Verdict;
}

/// Runs every probe concurrently and sums their scores.
pub struct SignalAggregator {
    probes: Vec<Arc<dyn Probe>>,
    threshold: u32,
    probe_timeout: Duration,
}

impl SignalAggregator {
    pub fn new(probes: Vec<Arc<dyn Probe>>, config: &DetectionConfig) -> Self {
        Self {
            probes,
            threshold: config.threshold,
            probe_timeout: config.probe_timeout,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

#[async_trait]
impl AbuseDetector for SignalAggregator {
    #[instrument(skip(self), fields(probes = self.probes.len()))]
    async fn detect(&self) -> Verdict {
        let readings = join_all(
            self.probes
                .iter()
                .map(|probe| run_guarded(probe.clone(), self.probe_timeout)),
        )
        .await;

        let total_score: u32 = readings.iter().map(|r| r.score).sum();
        let is_suspicious = total_score >= self.threshold;

        info!(
            total_score,
            threshold = self.threshold,
            is_suspicious,
            "Abuse signals aggregated"
        );

        Verdict {
            mode: DetectionMode::Scored,
            is_suspicious,
            total_score,
            readings,
        }
    }
}

/// Run one probe on its own task under `limit`.
///
/// Errors, panics and timeouts all become a zero-score reading for the
/// probe's channel.
pub(crate) async fn run_guarded(probe: Arc<dyn Probe>, limit: Duration) -> SignalReading {
    let channel = probe.channel();
    let task = tokio::spawn(async move { timeout(limit, probe.probe()).await });

    let error = match task.await {
        Ok(Ok(Ok(reading))) => return reading,
        Ok(Ok(Err(e))) => e,
        Ok(Err(_)) => ProbeError::Timeout(limit),
        Err(e) => ProbeError::Task(e.to_string()),
    };

    warn!(%channel, error = %error, "Probe failed");
    SignalReading::failed(channel, error)
}
