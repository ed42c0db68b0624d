//! Free-trial gate - command line entry point.
//!
//! Runs one trial attempt with the real probes and prints the outcome as JSON.

use abuse_signals::{DetectionMode, StunPeerConnections};
use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use trial_gate::{build_orchestrator, Config, ConsentDecision, TrialOutcome, TrialRequest};
use usage_store::SystemClock;

#[derive(Debug, Parser)]
#[command(name = "trial-gate", version, about = "Claim a monthly free-trial key")]
struct Args {
    /// Email address to claim the trial for
    email: String,

    /// Where the key should be delivered
    #[arg(long)]
    destination: Option<String>,

    /// Storage consent decision; prompts are reported when omitted
    #[arg(long, value_enum)]
    consent: Option<ConsentArg>,

    /// Override the configured detection mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConsentArg {
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Scored,
    Legacy,
}

impl From<ConsentArg> for ConsentDecision {
    fn from(arg: ConsentArg) -> Self {
        match arg {
            ConsentArg::Granted => ConsentDecision::Granted,
            ConsentArg::Denied => ConsentDecision::Denied,
        }
    }
}

impl From<ModeArg> for DetectionMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Scored => DetectionMode::Scored,
            ModeArg::Legacy => DetectionMode::Legacy,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(mode) = args.mode {
        config.detection.mode = mode.into();
    }

    // Initialize logging
    init_logging(&config.log_level);

    info!("Starting trial gate ({:?} detection)", config.detection.mode);

    let gate = build_orchestrator(
        &config,
        Arc::new(SystemClock),
        Arc::new(StunPeerConnections),
    )
    .context("Failed to build trial gate")?;

    if let Some(consent) = args.consent {
        gate.record_consent(consent.into()).await;
    }

    let mut outcome = gate.start().await;
    if outcome == TrialOutcome::AwaitingInput {
        let mut request = TrialRequest::new(args.email);
        request.destination = args.destination;
        outcome = gate.submit(request).await;
    }

    if let Some(verdict) = gate.last_verdict().await {
        info!(
            total_score = verdict.total_score,
            suspicious = verdict.is_suspicious,
            "Verdict: {}",
            serde_json::to_string(&verdict.readings).context("Failed to encode readings")?
        );
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&outcome).context("Failed to encode outcome")?
    );
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries the JSON outcome
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
