//! Free-trial state machine.
//!
//! ```text
//! Idle ─start─> CheckingAbuse ─┬─ suspicious ──> Blocked(vpn)
//!                              └─> CheckingConsent ─┬─ denied ───> Blocked(no-consent)
//!                                                   ├─ unknown ──> (ConsentRequired)
//!                                                   └─ granted ──> AwaitingFormInput
//! AwaitingFormInput ─submit─> CheckingIdentity ─┬─ used ──> Blocked(already-used)
//!                                               └─> Issuing ──> Issued
//! ```

use crate::error::{TrialError, TrialResult};
use abuse_signals::{AbuseDetector, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use trial_identity::{EmailPolicy, EmailValidation, TrialKey};
use usage_store::{Clock, UsageConsensusStore};

const DEFAULT_BLOCK_COOLDOWN: Duration = Duration::from_secs(10 * 60);
const GENERIC_ERROR: &str = "Something went wrong. Please try again.";

/// Why an attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockReason {
    Vpn,
    NoConsent,
    AlreadyUsed,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::Vpn => "vpn",
            BlockReason::NoConsent => "no-consent",
            BlockReason::AlreadyUsed => "already-used",
        }
    }
}

/// The visitor's answer to the storage consent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentDecision {
    Granted,
    Denied,
}

/// Where an attempt currently stands.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum TrialState {
    Idle,
    CheckingAbuse,
    CheckingConsent,
    AwaitingFormInput,
    CheckingIdentity,
    Issuing,
    Issued {
        key: TrialKey,
    },
    Blocked {
        reason: BlockReason,
        /// Only VPN blocks expire.
        until: Option<DateTime<Utc>>,
    },
}

impl TrialState {
    pub fn name(&self) -> &'static str {
        match self {
            TrialState::Idle => "idle",
            TrialState::CheckingAbuse => "checking-abuse",
            TrialState::CheckingConsent => "checking-consent",
            TrialState::AwaitingFormInput => "awaiting-form-input",
            TrialState::CheckingIdentity => "checking-identity",
            TrialState::Issuing => "issuing",
            TrialState::Issued { .. } => "issued",
            TrialState::Blocked { .. } => "blocked",
        }
    }

    /// A step is running and owns the state.
    fn is_busy(&self) -> bool {
        matches!(
            self,
            TrialState::CheckingAbuse | TrialState::CheckingIdentity | TrialState::Issuing
        )
    }
}

/// Form contents handed over by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialRequest {
    pub email: String,
    /// Where the issued key should be delivered, echoed back untouched.
    #[serde(default)]
    pub destination: Option<String>,
}

impl TrialRequest {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            destination: None,
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

/// Per-keystroke verdict on the email field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmailCheck {
    Valid,
    InvalidFormat,
    DisposableDomain,
    AlreadyUsed,
}

impl From<EmailValidation> for EmailCheck {
    fn from(validation: EmailValidation) -> Self {
        match validation {
            EmailValidation::Valid => EmailCheck::Valid,
            EmailValidation::InvalidFormat => EmailCheck::InvalidFormat,
            EmailValidation::DisposableDomain => EmailCheck::DisposableDomain,
        }
    }
}

/// What the UI should show after an operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum TrialOutcome {
    /// Ask the visitor for storage consent, then call `resolve_consent`.
    ConsentRequired,
    /// Show the email form.
    AwaitingInput,
    /// The submitted email was rejected; the form stays open.
    Invalid { reason: EmailValidation },
    Issued {
        key: TrialKey,
        destination: Option<String>,
        /// Backends that accepted the usage flag.
        flags_written: usize,
    },
    Blocked {
        reason: BlockReason,
        #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
        retry_after: Option<Duration>,
    },
    Error { message: String },
}

/// Drives one visitor through detection, consent and key issuance.
pub struct TrialOrchestrator {
    detector: Arc<dyn AbuseDetector>,
    store: UsageConsensusStore,
    policy: EmailPolicy,
    block_cooldown: Duration,
    state: Mutex<TrialState>,
    consent: Mutex<Option<ConsentDecision>>,
    last_verdict: Mutex<Option<Verdict>>,
}

impl TrialOrchestrator {
    pub fn new(
        detector: Arc<dyn AbuseDetector>,
        store: UsageConsensusStore,
        policy: EmailPolicy,
    ) -> Self {
        Self {
            detector,
            store,
            policy,
            block_cooldown: DEFAULT_BLOCK_COOLDOWN,
            state: Mutex::new(TrialState::Idle),
            consent: Mutex::new(None),
            last_verdict: Mutex::new(None),
        }
    }

    pub fn with_block_cooldown(mut self, block_cooldown: Duration) -> Self {
        self.block_cooldown = block_cooldown;
        self
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        self.store.clock()
    }

    /// Current state. An expired VPN block reads as idle.
    pub async fn state(&self) -> TrialState {
        let mut state = self.state.lock().await;
        if let TrialState::Blocked {
            until: Some(until), ..
        } = *state
        {
            if self.clock().now() >= until {
                debug!("VPN block expired");
                *state = TrialState::Idle;
            }
        }
        state.clone()
    }

    /// Verdict of the most recent abuse check.
    pub async fn last_verdict(&self) -> Option<Verdict> {
        self.last_verdict.lock().await.clone()
    }

    /// Remember a consent decision for later attempts without changing state.
    pub async fn record_consent(&self, decision: ConsentDecision) {
        info!(?decision, "Consent recorded");
        *self.consent.lock().await = Some(decision);
    }

    /// Begin an attempt: abuse check, then consent.
    #[instrument(skip(self))]
    pub async fn start(&self) -> TrialOutcome {
        let result = self.try_start().await;
        self.settle("start", result).await
    }

    /// Answer the consent prompt raised by `start`.
    #[instrument(skip(self))]
    pub async fn resolve_consent(&self, decision: ConsentDecision) -> TrialOutcome {
        let result = self.try_resolve_consent(decision).await;
        self.settle("resolve_consent", result).await
    }

    /// Submit the form.
    #[instrument(skip(self, request), fields(has_destination = request.destination.is_some()))]
    pub async fn submit(&self, request: TrialRequest) -> TrialOutcome {
        let result = self.try_submit(request).await;
        self.settle("submit", result).await
    }

    /// Check an email as it is typed. Does not change state.
    pub async fn validate_email(&self, email: &str) -> EmailCheck {
        let validation = self.policy.validate(email);
        if !validation.is_valid() {
            return validation.into();
        }

        if self.store.is_used(&self.policy.identify(email)).await {
            EmailCheck::AlreadyUsed
        } else {
            EmailCheck::Valid
        }
    }

    async fn try_start(&self) -> TrialResult<TrialOutcome> {
        self.enter("start", |_| true, TrialState::CheckingAbuse).await?;

        let verdict = self.detector.detect().await;
        let suspicious = verdict.is_suspicious;
        info!(
            mode = ?verdict.mode,
            total_score = verdict.total_score,
            suspicious,
            "Abuse check finished"
        );
        *self.last_verdict.lock().await = Some(verdict);

        if suspicious {
            let cooldown = chrono::Duration::from_std(self.block_cooldown)
                .unwrap_or_else(|_| chrono::Duration::zero());
            self.set(TrialState::Blocked {
                reason: BlockReason::Vpn,
                until: Some(self.clock().now() + cooldown),
            })
            .await;
            return Ok(TrialOutcome::Blocked {
                reason: BlockReason::Vpn,
                retry_after: Some(self.block_cooldown),
            });
        }

        self.set(TrialState::CheckingConsent).await;
        let consent = *self.consent.lock().await;
        match consent {
            Some(decision) => Ok(self.apply_consent(decision).await),
            None => {
                debug!("Consent not yet recorded");
                Ok(TrialOutcome::ConsentRequired)
            }
        }
    }

    async fn try_resolve_consent(&self, decision: ConsentDecision) -> TrialResult<TrialOutcome> {
        self.expect_state("resolve_consent", |s| *s == TrialState::CheckingConsent)
            .await?;
        self.record_consent(decision).await;
        Ok(self.apply_consent(decision).await)
    }

    async fn apply_consent(&self, decision: ConsentDecision) -> TrialOutcome {
        match decision {
            ConsentDecision::Granted => {
                self.set(TrialState::AwaitingFormInput).await;
                TrialOutcome::AwaitingInput
            }
            ConsentDecision::Denied => {
                self.set(TrialState::Blocked {
                    reason: BlockReason::NoConsent,
                    until: None,
                })
                .await;
                TrialOutcome::Blocked {
                    reason: BlockReason::NoConsent,
                    retry_after: None,
                }
            }
        }
    }

    async fn try_submit(&self, request: TrialRequest) -> TrialResult<TrialOutcome> {
        self.enter(
            "submit",
            |s| *s == TrialState::AwaitingFormInput,
            TrialState::CheckingIdentity,
        )
        .await?;

        let validation = self.policy.validate(&request.email);
        if !validation.is_valid() {
            info!(reason = validation.as_str(), "Email rejected");
            self.set(TrialState::AwaitingFormInput).await;
            return Ok(TrialOutcome::Invalid { reason: validation });
        }

        let fingerprint = self.policy.identify(&request.email);
        if self.store.is_used(&fingerprint).await {
            info!(%fingerprint, "Trial already claimed this month");
            self.set(TrialState::Blocked {
                reason: BlockReason::AlreadyUsed,
                until: None,
            })
            .await;
            return Ok(TrialOutcome::Blocked {
                reason: BlockReason::AlreadyUsed,
                retry_after: None,
            });
        }

        self.set(TrialState::Issuing).await;
        let key = TrialKey::derive(&fingerprint, &self.clock().now());
        let report = self.store.mark_used(&fingerprint).await;
        if !report.any_succeeded() {
            warn!(%fingerprint, "No backend accepted the usage flag");
        }

        info!(%key, flags_written = report.succeeded.len(), "Trial key issued");
        self.set(TrialState::Issued { key: key.clone() }).await;

        Ok(TrialOutcome::Issued {
            key,
            destination: request.destination,
            flags_written: report.succeeded.len(),
        })
    }

    /// Move to `next` if no step is running and `allowed` accepts the current state.
    async fn enter(
        &self,
        operation: &'static str,
        allowed: impl Fn(&TrialState) -> bool,
        next: TrialState,
    ) -> TrialResult<()> {
        let mut state = self.state.lock().await;
        check(operation, &state, allowed)?;
        debug!(from = state.name(), to = next.name(), "State transition");
        *state = next;
        Ok(())
    }

    async fn expect_state(
        &self,
        operation: &'static str,
        allowed: impl Fn(&TrialState) -> bool,
    ) -> TrialResult<()> {
        let state = self.state.lock().await;
        check(operation, &state, allowed)
    }

    async fn set(&self, next: TrialState) {
        let mut state = self.state.lock().await;
        debug!(from = state.name(), to = next.name(), "State transition");
        *state = next;
    }

    /// Turn an unexpected failure into a generic error and reset to idle.
    async fn settle(
        &self,
        operation: &'static str,
        result: TrialResult<TrialOutcome>,
    ) -> TrialOutcome {
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(operation, "Trial step failed: {}", e);
                // a busy step still owns the state
                if !matches!(e, TrialError::Busy(_)) {
                    self.set(TrialState::Idle).await;
                }
                TrialOutcome::Error {
                    message: GENERIC_ERROR.into(),
                }
            }
        }
    }
}

fn check(
    operation: &'static str,
    state: &TrialState,
    allowed: impl Fn(&TrialState) -> bool,
) -> TrialResult<()> {
    if state.is_busy() {
        return Err(TrialError::Busy(operation));
    }
    if !allowed(state) {
        return Err(TrialError::OutOfOrder {
            operation,
            state: state.name(),
        });
    }
    Ok(())
}
