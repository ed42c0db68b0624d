//! Consensus over redundant usage-flag backends.

use crate::backends::{
    CacheBackend, CookieBackend, FlagBackend, IndexedRecordBackend, KeyValueBackend,
};
use crate::clock::Clock;
use crate::error::BackendError;
use crate::types::{BackendKind, BackendReading, FlagPresence, UsageFlag, WriteReport};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use trial_identity::Fingerprint;

/// Default bound on a single backend call.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Logical usage-flag store spread over independent backends.
///
/// Reads are an OR across backends; writes fan out to all of them. Every
/// backend call is isolated: errors and timeouts are logged and never fail
/// the whole operation. There is no locking, so two near-simultaneous
/// claims for the same fingerprint can both pass the read check.
#[derive(Clone)]
pub struct UsageConsensusStore {
    backends: Vec<Arc<dyn FlagBackend>>,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
}

impl UsageConsensusStore {
    pub fn new(backends: Vec<Arc<dyn FlagBackend>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backends,
            clock,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// The five standard substrates, with the record store at `indexed_path`.
    pub fn standard(clock: Arc<dyn Clock>, indexed_path: impl Into<PathBuf>) -> Self {
        let backends: Vec<Arc<dyn FlagBackend>> = vec![
            Arc::new(KeyValueBackend::local()),
            Arc::new(KeyValueBackend::session()),
            Arc::new(CookieBackend::new(clock.clone())),
            Arc::new(IndexedRecordBackend::new(indexed_path)),
            Arc::new(CacheBackend::default()),
        ];

        info!("Usage store initialized with {} backends", backends.len());
        Self::new(backends, clock)
    }

    /// Bound each backend call by `call_timeout`.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn backend_kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Query every backend and report what each one saw.
    #[instrument(skip(self, fingerprint), fields(fingerprint = %fingerprint))]
    pub async fn inspect(&self, fingerprint: &Fingerprint) -> Vec<BackendReading> {
        let lookups = self.backends.iter().map(|backend| async move {
            let presence = match self.bounded(backend.has_flag(fingerprint)).await {
                Ok(true) => FlagPresence::Found,
                Ok(false) => FlagPresence::Missing,
                Err(e) => {
                    warn!(backend = %backend.kind(), error = %e, "Usage lookup failed");
                    FlagPresence::Failed {
                        error: e.to_string(),
                    }
                }
            };

            BackendReading {
                backend: backend.kind(),
                presence,
            }
        });

        join_all(lookups).await
    }

    /// True if any backend holds a flag for `fingerprint`.
    pub async fn is_used(&self, fingerprint: &Fingerprint) -> bool {
        let readings = self.inspect(fingerprint).await;
        let hits: Vec<BackendKind> = readings
            .iter()
            .filter(|r| r.presence == FlagPresence::Found)
            .map(|r| r.backend)
            .collect();

        debug!(?hits, "Usage lookup settled");
        !hits.is_empty()
    }

    /// Write a flag for `fingerprint` to every backend, best effort.
    #[instrument(skip(self, fingerprint), fields(fingerprint = %fingerprint))]
    pub async fn mark_used(&self, fingerprint: &Fingerprint) -> WriteReport {
        let flag = UsageFlag::new(fingerprint.clone(), self.clock.now());

        let writes = self.backends.iter().map(|backend| {
            let flag = &flag;
            async move { (backend.kind(), self.bounded(backend.set_flag(flag)).await) }
        });

        let mut report = WriteReport::default();
        for (kind, result) in join_all(writes).await {
            match result {
                Ok(()) => report.succeeded.push(kind),
                Err(e) => {
                    warn!(backend = %kind, error = %e, "Usage write failed");
                    report.failed.push((kind, e.to_string()));
                }
            }
        }

        info!(
            "Usage flag written to {}/{} backends",
            report.succeeded.len(),
            self.backends.len()
        );
        report
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        timeout(self.call_timeout, call)
            .await
            .unwrap_or(Err(BackendError::Timeout(self.call_timeout)))
    }
}
