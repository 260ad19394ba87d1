//! Waiting for a submitted signing request to reach a terminal state
//!
//! Issuance is asynchronous: an approver adds the Approved condition, then the
//! signer populates `status.certificate`, and either step may be observed
//! separately. The wait is split in two parts:
//!
//! - [`IssuanceState`] is a pure state machine fed with observations. It
//!   decides what is terminal and never looks at the clock.
//! - [`wait_for_certificate`] drives it by polling the authority, sleeping
//!   between polls, backing off on transient errors, and honoring an overall
//!   deadline and a cancellation token.
//!
//! ```text
//! Pending ──► Approved ──► Issued
//!    │           │
//!    │           ├──────► Failed
//!    └───────────┴──────► Denied
//! ```

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{SigningAuthority, SigningRequestObservation, SigningRequestStatus};
use crate::pki::IssuedCertificate;
use crate::retry::{Backoff, BackoffConfig};
use crate::Error;

/// Default overall wait for issuance
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default spacing between successful polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Longest overall wait a configuration may ask for
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Timing parameters for the wait
#[derive(Clone, Debug, PartialEq)]
pub struct WatchConfig {
    /// Overall deadline for reaching a terminal state
    pub timeout: Duration,
    /// Delay between polls that returned a non-terminal status
    pub poll_interval: Duration,
    /// Delays after failed polls
    pub backoff: BackoffConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Issuance lifecycle as seen by the watcher
#[derive(Clone, Debug, PartialEq)]
pub enum IssuanceState {
    /// Waiting for a decision
    Pending,
    /// Approved, waiting for certificate bytes
    Approved,
    /// Certificate available
    Issued(IssuedCertificate),
    /// Approval denied
    Denied(String),
    /// Signer failed
    Failed(String),
}

impl IssuanceState {
    /// Whether no further observation can change the state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IssuanceState::Issued(_) | IssuanceState::Denied(_) | IssuanceState::Failed(_)
        )
    }

    /// Apply one observation
    ///
    /// Terminal states are sticky. Denied or Failed end the wait from any
    /// non-terminal state. A Pending observation after Approved (stale read)
    /// keeps Approved. An Issued status without certificate bytes is treated
    /// as a bare approval.
    pub fn advance(self, observation: &SigningRequestObservation) -> IssuanceState {
        if self.is_terminal() {
            return self;
        }

        let reason = || observation.reason.clone().unwrap_or_default();

        match observation.status {
            SigningRequestStatus::Denied => IssuanceState::Denied(reason()),
            SigningRequestStatus::Failed => IssuanceState::Failed(reason()),
            SigningRequestStatus::Issued => match &observation.certificate {
                Some(cert) if !cert.pem().is_empty() => IssuanceState::Issued(cert.clone()),
                _ => IssuanceState::Approved,
            },
            SigningRequestStatus::Approved => IssuanceState::Approved,
            SigningRequestStatus::Pending => self,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            IssuanceState::Pending => "Pending",
            IssuanceState::Approved => "Approved",
            IssuanceState::Issued(_) => "Issued",
            IssuanceState::Denied(_) => "Denied",
            IssuanceState::Failed(_) => "Failed",
        }
    }
}

/// Poll the named request until it is issued, denied, failed, timed out or
/// cancelled
///
/// Cancellation interrupts both an in-flight query and a sleep. Each query is
/// also bounded by the remaining deadline, so a hung API call cannot stretch
/// the wait past `config.timeout`.
pub async fn wait_for_certificate<A: SigningAuthority + ?Sized>(
    authority: &A,
    name: &str,
    config: &WatchConfig,
    cancel: &CancellationToken,
) -> Result<IssuedCertificate, Error> {
    let deadline = Instant::now().checked_add(config.timeout).ok_or_else(|| {
        Error::invalid_config(format!(
            "timeout of {}s does not fit in a deadline",
            config.timeout.as_secs()
        ))
    })?;
    let mut state = IssuanceState::Pending;
    let mut backoff = Backoff::new(config.backoff.clone());
    let mut last_error: Option<String> = None;
    let mut polls = 0u32;

    info!(signing_request = %name, timeout_secs = config.timeout.as_secs(), "waiting for certificate");

    loop {
        polls += 1;
        let query = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(name)),
            result = tokio::time::timeout_at(deadline, authority.get(name)) => result,
        };

        let delay = match query {
            Err(_elapsed) => {
                return Err(Error::issuance_timeout(name, config.timeout, last_error));
            }
            Ok(Ok(observation)) => {
                let previous = state.name();
                state = state.advance(&observation);
                if state.name() != previous {
                    debug!(signing_request = %name, from = previous, to = state.name(), "issuance state changed");
                }

                match &state {
                    IssuanceState::Issued(cert) => {
                        info!(signing_request = %name, polls, "certificate issued");
                        return Ok(cert.clone());
                    }
                    IssuanceState::Denied(reason) => {
                        return Err(Error::approval_denied(name, reason.clone()));
                    }
                    IssuanceState::Failed(reason) => {
                        return Err(Error::issuance_failed(name, reason.clone()));
                    }
                    IssuanceState::Pending | IssuanceState::Approved => {}
                }

                backoff.reset();
                last_error = None;
                config.poll_interval
            }
            Ok(Err(e)) if !e.is_transient_query() => {
                warn!(signing_request = %name, error = %e, "signing request can no longer be observed");
                return Err(e);
            }
            Ok(Err(e)) => {
                let delay = backoff.next_delay();
                warn!(
                    signing_request = %name,
                    attempt = backoff.attempt(),
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "query failed, retrying"
                );
                last_error = Some(e.to_string());
                delay
            }
        };

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::issuance_timeout(name, config.timeout, last_error));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(name)),
            _ = tokio::time::sleep_until((now + delay).min(deadline)) => {}
        }

        if Instant::now() >= deadline {
            return Err(Error::issuance_timeout(name, config.timeout, last_error));
        }
    }
}
