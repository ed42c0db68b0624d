//! Free-trial gate.
//!
//! Wires abuse detection, email identity and redundant usage tracking into
//! one [`TrialOrchestrator`]. The UI glue calls [`TrialOrchestrator::start`],
//! answers the consent prompt and submits a [`TrialRequest`]; every call
//! returns a [`TrialOutcome`] to render.

pub mod config;
pub mod error;
pub mod orchestrator;

pub use config::Config;
pub use error::{TrialError, TrialResult};
pub use orchestrator::{
    BlockReason, ConsentDecision, EmailCheck, TrialOrchestrator, TrialOutcome, TrialRequest,
    TrialState,
};

use abuse_signals::{build_detector, PeerConnectionFactory};
use std::sync::Arc;
use tracing::info;
use trial_identity::EmailPolicy;
use usage_store::{Clock, UsageConsensusStore};

/// Build an orchestrator with the standard backends and the configured detector.
pub fn build_orchestrator(
    config: &Config,
    clock: Arc<dyn Clock>,
    peers: Arc<dyn PeerConnectionFactory>,
) -> TrialResult<TrialOrchestrator> {
    let detector = build_detector(&config.detection, peers, config.client.clone())?;

    let store = UsageConsensusStore::standard(clock, &config.storage.indexed_path)
        .with_call_timeout(config.storage.backend_timeout);

    let policy = EmailPolicy::new(&config.identity.extra_disposable_domains)
        .with_digester(config.identity.digester);

    info!(
        backends = store.backend_kinds().len(),
        digester = ?policy.digester(),
        indexed_path = %config.storage.indexed_path.display(),
        "Trial gate ready"
    );

    Ok(TrialOrchestrator::new(detector, store, policy)
        .with_block_cooldown(config.orchestrator.block_cooldown))
}
