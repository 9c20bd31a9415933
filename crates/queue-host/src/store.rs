//! Store traits consumed by the host: message queue and lease backends.
//!
//! Backend adapters translate a provider's message and lease representation
//! into these types. Transient network failures are expected to be retried
//! inside the adapter; the host treats every error it sees as final for the
//! operation in question.

use crate::error::QueueError;
use crate::message::{Claim, MessageId, ReceiptHandle, ReceivedMessage, Timestamp};
use async_trait::async_trait;
use std::time::Duration;

// ============================================================================
// Message Store
// ============================================================================

/// Interface implemented by queue backends (SQS, Azure Storage queues, ...)
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Receive up to `max_messages`, hiding them for `visibility_timeout`
    async fn fetch_batch(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Push the visibility deadline out by `visibility_timeout`.
    ///
    /// Returns the reissued receipt; the one passed in is stale afterwards.
    async fn extend_visibility(
        &self,
        message_id: &MessageId,
        receipt: &ReceiptHandle,
        visibility_timeout: Duration,
    ) -> Result<ReceiptHandle, QueueError>;

    /// Remove message from the queue
    async fn delete(&self, message: &ReceivedMessage) -> Result<(), QueueError>;

    /// Return message to the queue so it can be fetched again right away
    async fn make_visible(&self, message: &ReceivedMessage) -> Result<(), QueueError>;

    /// Copy message to the dead letter queue
    async fn move_to_dead_letter(
        &self,
        message: &ReceivedMessage,
        reason: &str,
    ) -> Result<(), QueueError>;
}

// ============================================================================
// Lock Store
// ============================================================================

/// Observed state of a lease resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Resource exists and nobody holds it
    Available,
    /// Resource is held by a valid lease
    Leased,
    /// A lease existed but ran past its deadline
    Expired,
    /// A lease was forcibly broken
    Broken,
    /// The backing resource does not exist yet
    Missing,
}

impl LeaseState {
    /// Check if a new lease may be taken in this state
    pub fn allows_acquire(&self) -> bool {
        !matches!(self, Self::Leased)
    }
}

/// Opaque lease token issued by the lock store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseId(String);

impl LeaseId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A held lease on a singleton scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub scope: String,
    pub lease_id: LeaseId,
    pub expires_at: Timestamp,
}

impl Claim for LockHandle {
    fn deadline(&self) -> Timestamp {
        self.expires_at
    }
}

/// Interface implemented by lease backends (blob leases, DynamoDB, ...)
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Read the current lease state of `scope`
    async fn lease_state(&self, scope: &str) -> Result<LeaseState, QueueError>;

    /// Create the backing resource; succeeds if it already exists
    async fn create_if_missing(&self, scope: &str) -> Result<(), QueueError>;

    /// Take an exclusive lease for `duration`
    async fn acquire_lease(&self, scope: &str, duration: Duration)
        -> Result<LockHandle, QueueError>;

    /// Extend a held lease, returning its new deadline
    async fn renew_lease(&self, scope: &str, lease_id: &LeaseId)
        -> Result<Timestamp, QueueError>;

    /// Give up a held lease; the resource itself stays for reuse
    async fn release_lease(&self, scope: &str, lease_id: &LeaseId) -> Result<(), QueueError>;
}
