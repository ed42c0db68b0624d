//! Network latency probe.

use super::Probe;
use crate::config::LatencyConfig;
use crate::error::ProbeError;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::types::{SignalChannel, SignalReading};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Round-trip statistics in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub mean: f64,
    pub max: u64,
}

impl LatencySummary {
    pub fn from_samples(samples: &[u64]) -> Option<Self> {
        let max = *samples.iter().max()?;
        let mean = samples.iter().sum::<u64>() as f64 / samples.len() as f64;
        Some(Self { mean, max })
    }
}

/// Score a set of per-endpoint latencies.
pub fn score_latencies(samples: &[u64]) -> SignalReading {
    let Some(summary) = LatencySummary::from_samples(samples) else {
        return latency_error("no latency samples");
    };

    let (score, reason) = if summary.mean > 1000.0 {
        (30, "high_latency")
    } else if summary.max > 3000 {
        (25, "latency_spike")
    } else if summary.mean > 500.0 {
        (15, "moderate_latency")
    } else {
        (0, "normal")
    };

    SignalReading::new(
        SignalChannel::Latency,
        score,
        reason,
        json!({
            "samples_ms": samples,
            "mean_ms": summary.mean.round() as u64,
            "max_ms": summary.max,
        }),
    )
}

fn latency_error(error: impl std::fmt::Display) -> SignalReading {
    SignalReading::new(
        SignalChannel::Latency,
        10,
        "latency_error",
        json!({ "error": error.to_string() }),
    )
}

/// Times HEAD requests to a handful of high-availability endpoints.
pub struct LatencyProbe {
    endpoints: Vec<String>,
    request_timeout: Duration,
    penalty: Duration,
    retry: RetryPolicy,
}

impl LatencyProbe {
    pub fn new(config: &LatencyConfig) -> Self {
        Self {
            endpoints: config.endpoints.clone(),
            request_timeout: config.request_timeout,
            penalty: config.penalty,
            retry: config.retry,
        }
    }

    /// Milliseconds for one endpoint, or the penalty if it never answered.
    async fn measure(&self, client: &Client, endpoint: &str) -> u64 {
        let started = Instant::now();
        let result =
            retry_with_backoff(&self.retry, || async move { client.head(endpoint).send().await })
                .await;

        match result {
            Ok(response) => {
                let elapsed = started.elapsed().as_millis() as u64;
                debug!(endpoint, status = %response.status(), elapsed_ms = elapsed, "Latency sample");
                elapsed
            }
            Err(e) => {
                debug!(endpoint, error = %e, "Latency request failed, applying penalty");
                self.penalty.as_millis() as u64
            }
        }
    }

    async fn sample(&self) -> Result<Vec<u64>, ProbeError> {
        if self.endpoints.is_empty() {
            return Err(ProbeError::NoEndpoints);
        }

        let client = Client::builder().timeout(self.request_timeout).build()?;

        let samples = join_all(
            self.endpoints
                .iter()
                .map(|endpoint| self.measure(&client, endpoint)),
        )
        .await;

        Ok(samples)
    }
}

#[async_trait]
impl Probe for LatencyProbe {
    fn channel(&self) -> SignalChannel {
        SignalChannel::Latency
    }

    #[instrument(skip(self), fields(endpoints = self.endpoints.len()))]
    async fn probe(&self) -> Result<SignalReading, ProbeError> {
        let reading = match self.sample().await {
            Ok(samples) => score_latencies(&samples),
            Err(e) => {
                warn!("Latency probe failed: {}", e);
                latency_error(e)
            }
        };

        debug!(score = reading.score, reason = %reading.reason, "Latency probe finished");
        Ok(reading)
    }
}
