//! Lease-based mutual exclusion over named scopes.

use crate::error::QueueError;
use crate::message::Claim;
use crate::store::{LeaseState, LockHandle, LockStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default lease duration, independent of message visibility timeouts
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Acquire, renew and release leases on a [`LockStore`]
#[derive(Clone)]
pub struct DistributedLockManager {
    store: Arc<dyn LockStore>,
    lease_duration: Duration,
}

impl DistributedLockManager {
    pub fn new(store: Arc<dyn LockStore>, lease_duration: Duration) -> Self {
        Self {
            store,
            lease_duration,
        }
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Try once to take the lease on `scope`.
    ///
    /// Returns `Ok(None)` when another owner holds it. A missing resource is
    /// created and the acquire retried exactly once.
    pub async fn try_acquire(&self, scope: &str) -> Result<Option<LockHandle>, QueueError> {
        match self.acquire_step(scope).await {
            Err(QueueError::ResourceMissing { .. }) => {
                info!(scope = %scope, "Creating lock resource");
                self.store.create_if_missing(scope).await?;

                match self.acquire_step(scope).await {
                    // Deleted again between create and acquire; report as contended
                    Err(QueueError::ResourceMissing { .. }) => Ok(None),
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Read state and take the lease if the state allows it
    async fn acquire_step(&self, scope: &str) -> Result<Option<LockHandle>, QueueError> {
        match self.store.lease_state(scope).await? {
            LeaseState::Missing => Err(QueueError::ResourceMissing {
                scope: scope.to_string(),
            }),
            LeaseState::Leased => {
                debug!(scope = %scope, "Lock is held by another owner");
                Ok(None)
            }
            LeaseState::Available | LeaseState::Expired | LeaseState::Broken => {
                match self.store.acquire_lease(scope, self.lease_duration).await {
                    Ok(handle) => {
                        debug!(
                            scope = %scope,
                            lease_id = %handle.lease_id,
                            expires_at = %handle.expires_at,
                            "Lease acquired"
                        );
                        Ok(Some(handle))
                    }
                    // Another owner won the race between read and acquire
                    Err(QueueError::LeaseConflict { .. }) => Ok(None),
                    Err(error) => Err(error),
                }
            }
        }
    }

    /// Extend a held lease.
    ///
    /// Fails with [`QueueError::LeaseLost`] unless the scope is still leased,
    /// so an expired or broken lease is never revived under two holders.
    pub async fn renew(&self, handle: &LockHandle) -> Result<LockHandle, QueueError> {
        let state = self.store.lease_state(&handle.scope).await?;
        if state != LeaseState::Leased {
            return Err(QueueError::LeaseLost {
                scope: handle.scope.clone(),
            });
        }

        let expires_at = self
            .store
            .renew_lease(&handle.scope, &handle.lease_id)
            .await?;

        Ok(LockHandle {
            expires_at,
            ..handle.clone()
        })
    }

    /// Give up a held lease.
    ///
    /// A missing resource or a lease now held by someone else leaves nothing
    /// to release and counts as success.
    pub async fn release(&self, handle: &LockHandle) -> Result<(), QueueError> {
        match self
            .store
            .release_lease(&handle.scope, &handle.lease_id)
            .await
        {
            Ok(()) => Ok(()),
            Err(QueueError::ResourceMissing { .. }) | Err(QueueError::LeaseConflict { .. }) => {
                debug!(
                    scope = %handle.scope,
                    deadline = %handle.deadline(),
                    "Lease already gone; nothing to release"
                );
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
