//! # Singleton Execution
//!
//! At most one execution at a time per scope, across every process sharing a
//! lock store.
//!
//! [`SingletonLockManager`] wraps [`DistributedLockManager`] with bounded
//! acquire retries and scope resolution. [`SingletonExecutor`] decorates any
//! [`MessageExecutor`] so the inner work only runs while the lease on the
//! message's scope is held and renewed.

use crate::config::SingletonOptions;
use crate::delay::{DelayStrategy, LinearDelayStrategy, RandomizedExponentialBackoff};
use crate::error::{ConfigurationError, ProcessingError, QueueError, ScopeResolutionError};
use crate::executor::MessageExecutor;
use crate::lock::DistributedLockManager;
use crate::message::ReceivedMessage;
use crate::renewal::{ClaimFault, ClaimRenewer, RenewalGuard};
use crate::scope::ScopeExpression;
use crate::store::{LockHandle, LockStore};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default floor for the lease renewal cadence
pub const DEFAULT_RENEWAL_MIN_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Singleton Lock Manager
// ============================================================================

/// Lease acquisition with retry and backoff, plus scope resolution
pub struct SingletonLockManager {
    locks: DistributedLockManager,
    scope: ScopeExpression,
    max_retries: u32,
    retry_backoff: RandomizedExponentialBackoff,
}

impl SingletonLockManager {
    /// Create a manager over `store` using the lease and retry settings in
    /// `options`
    pub fn new(
        store: Arc<dyn LockStore>,
        options: &SingletonOptions,
    ) -> Result<Self, ConfigurationError> {
        options.validate()?;

        let retry_backoff = RandomizedExponentialBackoff::new(
            options.min_retry_interval(),
            options.max_retry_interval(),
            options.delta_retry_backoff(),
        )?;

        Ok(Self {
            locks: DistributedLockManager::new(store, options.lease_duration()),
            scope: options.scope.clone(),
            max_retries: options.max_retries,
            retry_backoff,
        })
    }

    pub fn lease_duration(&self) -> Duration {
        self.locks.lease_duration()
    }

    /// Derive the scope name of `message` from the configured expression
    pub fn resolve_scope(&self, message: &ReceivedMessage) -> Result<String, ScopeResolutionError> {
        self.scope.resolve(message)
    }

    /// Acquire the lease on `scope`, retrying while another owner holds it.
    ///
    /// Makes at most `max_retries` attempts with randomized exponential
    /// backoff in between. Cancellation ends the wait early.
    pub async fn acquire_lock(
        &self,
        scope: &str,
        cancellation: &CancellationToken,
    ) -> Result<LockHandle, ProcessingError> {
        // Fresh entropy per call keeps concurrent waiters from retrying in step
        let mut backoff = self.retry_backoff.clone().with_rng(StdRng::from_entropy());

        for attempt in 1..=self.max_retries {
            let acquired = tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Err(ProcessingError::Cancelled),
                result = self.locks.try_acquire(scope) => result?,
            };

            if let Some(handle) = acquired {
                info!(
                    scope = %scope,
                    attempt = attempt,
                    lease_id = %handle.lease_id,
                    "Singleton lock acquired"
                );
                return Ok(handle);
            }

            if attempt == self.max_retries {
                break;
            }

            let delay = backoff.next_delay(false, None);
            debug!(
                scope = %scope,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Singleton lock busy; retrying"
            );

            tokio::select! {
                _ = cancellation.cancelled() => return Err(ProcessingError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        warn!(
            scope = %scope,
            attempts = self.max_retries,
            "Singleton lock unavailable; giving up"
        );
        Err(ProcessingError::LockUnavailable {
            scope: scope.to_string(),
            attempts: self.max_retries,
        })
    }

    /// Extend a held lease
    pub async fn renew_lock(&self, handle: &LockHandle) -> Result<LockHandle, QueueError> {
        match self.locks.renew(handle).await {
            Ok(renewed) => {
                debug!(
                    scope = %handle.scope,
                    expires_at = %renewed.expires_at,
                    "Singleton lock renewed"
                );
                Ok(renewed)
            }
            Err(error) => {
                warn!(scope = %handle.scope, error = %error, "Singleton lock renewal failed");
                Err(error)
            }
        }
    }

    /// Release a held lease
    pub async fn release_lock(&self, handle: &LockHandle) -> Result<(), QueueError> {
        match self.locks.release(handle).await {
            Ok(()) => {
                info!(scope = %handle.scope, "Singleton lock released");
                Ok(())
            }
            Err(error) => {
                error!(scope = %handle.scope, error = %error, "Singleton lock release failed");
                Err(error)
            }
        }
    }
}

/// Renews a singleton lease for a [`RenewalGuard`]
struct LeaseRenewer {
    locks: Arc<SingletonLockManager>,
    scope: String,
}

#[async_trait]
impl ClaimRenewer<LockHandle> for LeaseRenewer {
    async fn renew(&self, claim: &LockHandle) -> Result<LockHandle, QueueError> {
        self.locks.renew_lock(claim).await
    }

    fn resource(&self) -> &str {
        &self.scope
    }
}

// ============================================================================
// Singleton Executor
// ============================================================================

/// Runs the inner executor only while holding the lease on the message scope
pub struct SingletonExecutor<E> {
    inner: E,
    locks: Arc<SingletonLockManager>,
    renewal_min_interval: Duration,
}

impl<E: MessageExecutor> SingletonExecutor<E> {
    pub fn new(inner: E, locks: Arc<SingletonLockManager>) -> Self {
        Self {
            inner,
            locks,
            renewal_min_interval: DEFAULT_RENEWAL_MIN_INTERVAL,
        }
    }

    /// Set the floor for the lease renewal cadence
    pub fn with_renewal_min_interval(mut self, interval: Duration) -> Self {
        self.renewal_min_interval = interval;
        self
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: MessageExecutor> MessageExecutor for SingletonExecutor<E> {
    async fn execute(
        &self,
        message: &ReceivedMessage,
        cancellation: CancellationToken,
    ) -> Result<(), ProcessingError> {
        let scope = self.locks.resolve_scope(message).map_err(|error| {
            warn!(
                message_id = %message.message_id,
                error = %error,
                "Singleton scope could not be resolved"
            );
            error
        })?;

        let handle = self.locks.acquire_lock(&scope, &cancellation).await?;

        let fault = ClaimFault::new(cancellation.child_token());
        let guard = RenewalGuard::start(
            handle,
            LinearDelayStrategy::new(self.renewal_min_interval),
            Arc::new(LeaseRenewer {
                locks: Arc::clone(&self.locks),
                scope: scope.clone(),
            }),
            fault.clone(),
            &cancellation,
        );

        let work_token = fault.token().clone();
        let mut result = tokio::select! {
            biased;
            result = self.inner.execute(message, work_token.clone()) => result,
            _ = work_token.cancelled() => Err(ProcessingError::Cancelled),
        };

        if result.is_err() {
            if let Some(reason) = fault.reason() {
                warn!(
                    message_id = %message.message_id,
                    scope = %scope,
                    reason = %reason,
                    "Singleton lock lost while processing"
                );
                result = Err(ProcessingError::LockLost {
                    scope: scope.clone(),
                    reason: reason.to_string(),
                });
            }
        }

        let latest = guard.stop().await;
        if let Err(error) = self.locks.release_lock(&latest).await {
            // The work outcome is what the caller acts on
            debug!(
                message_id = %message.message_id,
                scope = %scope,
                error = %error,
                "Ignoring release failure"
            );
        }

        result
    }
}

#[cfg(test)]
#[path = "singleton_tests.rs"]
mod tests;
