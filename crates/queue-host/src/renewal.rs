//! # Claim Renewal
//!
//! A [`RenewalGuard`] keeps a message visibility claim or a lock lease alive
//! while work runs. It renews in the background on the cadence of a
//! [`DelayStrategy`] and, if a renewal is rejected, trips a [`ClaimFault`]
//! which cancels the guarded work.
//!
//! # Lifecycle
//!
//! 1. [`RenewalGuard::start`] spawns the loop. A guard only exists once
//!    started, so a claim can never have two loops renewing it.
//! 2. The owner runs its work under [`ClaimFault::token`].
//! 3. [`RenewalGuard::stop`] cancels the loop, waits for it to exit and hands
//!    back the most recent claim for settling.

use crate::delay::DelayStrategy;
use crate::error::QueueError;
use crate::message::Claim;
use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Renew operation for one kind of claim
#[async_trait]
pub trait ClaimRenewer<C: Claim>: Send + Sync {
    /// Extend `claim`, returning its replacement
    async fn renew(&self, claim: &C) -> Result<C, QueueError>;

    /// Name of the claimed resource, for logging
    fn resource(&self) -> &str;
}

// ============================================================================
// Claim Fault
// ============================================================================

/// One-shot signal that a claim could not be kept.
///
/// Tripping records the reason (first writer wins) and cancels the token the
/// guarded work runs under.
#[derive(Debug, Clone)]
pub struct ClaimFault {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl ClaimFault {
    /// Create a fault signal that cancels `token` when tripped
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// Token the guarded work should observe
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Record the loss of the claim and cancel the guarded work.
    ///
    /// Returns `true` only for the call that recorded the reason.
    pub fn trip(&self, reason: impl Into<String>) -> bool {
        let recorded = self.reason.set(reason.into()).is_ok();
        self.token.cancel();
        recorded
    }

    pub fn is_tripped(&self) -> bool {
        self.reason.get().is_some()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }
}

// ============================================================================
// Renewal Guard
// ============================================================================

/// Background renewal loop for a single claim
pub struct RenewalGuard<C: Claim> {
    cancel: CancellationToken,
    task: Option<JoinHandle<C>>,
    initial: C,
}

impl<C: Claim> RenewalGuard<C> {
    /// Start renewing `claim`.
    ///
    /// The loop stops on its own when `parent` is cancelled, when a renewal
    /// reports cancellation, or after tripping `fault` on a rejected renewal.
    pub fn start<S>(
        claim: C,
        strategy: S,
        renewer: Arc<dyn ClaimRenewer<C>>,
        fault: ClaimFault,
        parent: &CancellationToken,
    ) -> Self
    where
        S: DelayStrategy + 'static,
    {
        let cancel = parent.child_token();
        let task = tokio::spawn(renewal_loop(
            claim.clone(),
            strategy,
            renewer,
            fault,
            cancel.clone(),
        ));

        Self {
            cancel,
            task: Some(task),
            initial: claim,
        }
    }

    /// Stop renewing and wait for the loop to exit.
    ///
    /// Errors from the final iteration are swallowed. Returns the most recent
    /// claim the loop obtained.
    pub async fn stop(mut self) -> C {
        self.cancel.cancel();

        let Some(task) = self.task.take() else {
            return self.initial.clone();
        };

        match task.await {
            Ok(latest) => latest,
            Err(error) => {
                warn!(error = %error, "Renewal loop ended abnormally");
                self.initial.clone()
            }
        }
    }
}

impl<C: Claim> Drop for RenewalGuard<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn renewal_loop<C, S>(
    mut claim: C,
    mut strategy: S,
    renewer: Arc<dyn ClaimRenewer<C>>,
    fault: ClaimFault,
    cancel: CancellationToken,
) -> C
where
    C: Claim,
    S: DelayStrategy,
{
    loop {
        // A rejected renewal ends the loop, so every delay follows a success
        let delay = strategy.next_delay(true, Some(claim.deadline()));

        let attempt = tokio::select! {
            _ = cancel.cancelled() => return claim,
            result = async {
                tokio::time::sleep(delay).await;
                renewer.renew(&claim).await
            } => result,
        };

        match attempt {
            Ok(renewed) => {
                debug!(
                    resource = renewer.resource(),
                    deadline = %renewed.deadline(),
                    "Claim renewed"
                );
                claim = renewed;
            }
            Err(error) if error.is_cancellation() || cancel.is_cancelled() => {
                return claim;
            }
            Err(error) => {
                warn!(
                    resource = renewer.resource(),
                    error = %error,
                    "Claim renewal rejected; cancelling guarded work"
                );
                fault.trip(error.to_string());
                return claim;
            }
        }
    }
}

#[cfg(test)]
#[path = "renewal_tests.rs"]
mod tests;
