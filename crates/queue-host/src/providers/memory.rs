//! In-memory message and lock stores for testing and development.
//!
//! This module provides fully functional in-memory backends that:
//! - Hide fetched messages for the requested visibility timeout
//! - Reissue receipts on every extension and reject stale ones
//! - Keep a dead letter queue for inspection
//! - Model lease states, including expiry and broken leases
//!
//! They are intended for unit tests of host consumers, for local runs of the
//! service, and as a reference for cloud backend adapters.

use crate::error::QueueError;
use crate::message::{Message, MessageId, ReceiptHandle, ReceivedMessage, Timestamp};
use crate::store::{LeaseId, LeaseState, LockHandle, LockStore, MessageStore};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const PROVIDER: &str = "in-memory";

fn poisoned() -> QueueError {
    QueueError::ProviderError {
        provider: PROVIDER.to_string(),
        code: "StatePoisoned".to_string(),
        message: "a previous operation panicked while holding the store lock".to_string(),
    }
}

fn new_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A message stored in the queue with metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    attributes: HashMap<String, String>,
    group_id: Option<String>,
    dequeue_count: u32,
    first_delivered_at: Option<Timestamp>,
}

/// A message currently hidden from other consumers
struct InFlightMessage {
    message: StoredMessage,
    receipt: ReceiptHandle,
}

#[derive(Default)]
struct QueueState {
    /// Visible messages (FIFO order)
    ready: VecDeque<StoredMessage>,
    /// Hidden messages keyed by id
    in_flight: HashMap<MessageId, InFlightMessage>,
    /// Dead letter queue
    dead_letter: Vec<DeadLetteredMessage>,
}

impl QueueState {
    /// Return messages whose visibility timeout ran out to the ready queue
    fn reclaim_expired(&mut self) {
        let expired: Vec<MessageId> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.receipt.is_expired())
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(entry) = self.in_flight.remove(&id) {
                self.ready.push_back(entry.message);
            }
        }
    }

    /// Look up an in-flight message, checking the presented receipt
    fn claimed(
        &mut self,
        message_id: &MessageId,
        receipt: &ReceiptHandle,
    ) -> Result<&mut InFlightMessage, QueueError> {
        let entry = self
            .in_flight
            .get_mut(message_id)
            .ok_or_else(|| QueueError::MessageNotFound {
                message_id: message_id.to_string(),
            })?;

        if entry.receipt.handle() != receipt.handle() {
            return Err(QueueError::ClaimRejected {
                resource: message_id.to_string(),
                message: "receipt handle is stale".to_string(),
            });
        }

        if entry.receipt.is_expired() {
            return Err(QueueError::ClaimRejected {
                resource: message_id.to_string(),
                message: "visibility timeout has elapsed".to_string(),
            });
        }

        Ok(entry)
    }
}

/// A message that was moved to the dead letter queue
#[derive(Debug, Clone)]
pub struct DeadLetteredMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub dequeue_count: u32,
    pub reason: String,
}

// ============================================================================
// InMemoryMessageStore
// ============================================================================

/// In-memory queue with visibility timeouts and a dead letter queue
#[derive(Default)]
pub struct InMemoryMessageStore {
    state: Mutex<QueueState>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        self.state.lock().map_err(|_| poisoned())
    }

    /// Enqueue a message, returning its id
    pub fn send(&self, message: Message) -> Result<MessageId, QueueError> {
        let message_id = MessageId::new();
        self.state()?.ready.push_back(StoredMessage {
            message_id: message_id.clone(),
            body: message.body,
            attributes: message.attributes,
            group_id: message.group_id,
            dequeue_count: 0,
            first_delivered_at: None,
        });
        Ok(message_id)
    }

    /// Number of messages visible to consumers
    pub fn ready_count(&self) -> usize {
        self.state().map(|state| state.ready.len()).unwrap_or(0)
    }

    /// Number of messages currently hidden by a receipt
    pub fn in_flight_count(&self) -> usize {
        self.state().map(|state| state.in_flight.len()).unwrap_or(0)
    }

    /// Snapshot of the dead letter queue
    pub fn dead_letters(&self) -> Vec<DeadLetteredMessage> {
        self.state()
            .map(|state| state.dead_letter.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn fetch_batch(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut state = self.state()?;
        state.reclaim_expired();

        let mut batch = Vec::new();
        while batch.len() < max_messages as usize {
            let Some(mut message) = state.ready.pop_front() else {
                break;
            };

            let now = Timestamp::now();
            message.dequeue_count += 1;
            let first_delivered_at = *message.first_delivered_at.get_or_insert(now);
            let receipt = ReceiptHandle::new(new_token(), Timestamp::after(visibility_timeout));

            batch.push(ReceivedMessage {
                message_id: message.message_id.clone(),
                body: message.body.clone(),
                attributes: message.attributes.clone(),
                group_id: message.group_id.clone(),
                receipt_handle: receipt.clone(),
                dequeue_count: message.dequeue_count,
                first_delivered_at,
                delivered_at: now,
            });

            state
                .in_flight
                .insert(message.message_id.clone(), InFlightMessage { message, receipt });
        }

        Ok(batch)
    }

    async fn extend_visibility(
        &self,
        message_id: &MessageId,
        receipt: &ReceiptHandle,
        visibility_timeout: Duration,
    ) -> Result<ReceiptHandle, QueueError> {
        let mut state = self.state()?;
        let entry = state.claimed(message_id, receipt).map_err(|error| match error {
            // A reclaimed message has no claim left to extend
            QueueError::MessageNotFound { message_id } => QueueError::ClaimRejected {
                resource: message_id,
                message: "message is no longer in flight".to_string(),
            },
            other => other,
        })?;

        entry.receipt = ReceiptHandle::new(new_token(), Timestamp::after(visibility_timeout));
        Ok(entry.receipt.clone())
    }

    async fn delete(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        let mut state = self.state()?;
        state.claimed(&message.message_id, &message.receipt_handle)?;
        state.in_flight.remove(&message.message_id);
        Ok(())
    }

    async fn make_visible(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        let mut state = self.state()?;
        state.claimed(&message.message_id, &message.receipt_handle)?;

        if let Some(entry) = state.in_flight.remove(&message.message_id) {
            state.ready.push_back(entry.message);
        }
        Ok(())
    }

    async fn move_to_dead_letter(
        &self,
        message: &ReceivedMessage,
        reason: &str,
    ) -> Result<(), QueueError> {
        let mut state = self.state()?;
        let entry = state.claimed(&message.message_id, &message.receipt_handle)?;

        let dead = DeadLetteredMessage {
            message_id: entry.message.message_id.clone(),
            body: entry.message.body.clone(),
            dequeue_count: entry.message.dequeue_count,
            reason: reason.to_string(),
        };
        state.dead_letter.push(dead);
        Ok(())
    }
}

// ============================================================================
// InMemoryLockStore
// ============================================================================

struct LeaseRecord {
    lease: Option<(LeaseId, Timestamp)>,
    duration: Duration,
    broken: bool,
}

impl LeaseRecord {
    fn state(&self) -> LeaseState {
        if self.broken {
            return LeaseState::Broken;
        }

        match &self.lease {
            None => LeaseState::Available,
            Some((_, expires_at)) if expires_at.has_passed() => LeaseState::Expired,
            Some(_) => LeaseState::Leased,
        }
    }

    fn holds(&self, lease_id: &LeaseId) -> bool {
        matches!(&self.lease, Some((held, _)) if held == lease_id)
    }
}

/// In-memory lease backend
#[derive(Default)]
pub struct InMemoryLockStore {
    leases: Mutex<HashMap<String, LeaseRecord>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn leases(&self) -> Result<MutexGuard<'_, HashMap<String, LeaseRecord>>, QueueError> {
        self.leases.lock().map_err(|_| poisoned())
    }

    /// Forcibly end the current lease on `scope`
    pub fn break_lease(&self, scope: &str) -> Result<(), QueueError> {
        let mut leases = self.leases()?;
        let record = leases
            .get_mut(scope)
            .ok_or_else(|| QueueError::ResourceMissing {
                scope: scope.to_string(),
            })?;

        record.lease = None;
        record.broken = true;
        Ok(())
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn lease_state(&self, scope: &str) -> Result<LeaseState, QueueError> {
        Ok(self
            .leases()?
            .get(scope)
            .map(LeaseRecord::state)
            .unwrap_or(LeaseState::Missing))
    }

    async fn create_if_missing(&self, scope: &str) -> Result<(), QueueError> {
        self.leases()?
            .entry(scope.to_string())
            .or_insert_with(|| LeaseRecord {
                lease: None,
                duration: Duration::ZERO,
                broken: false,
            });
        Ok(())
    }

    async fn acquire_lease(
        &self,
        scope: &str,
        duration: Duration,
    ) -> Result<LockHandle, QueueError> {
        let mut leases = self.leases()?;
        let record = leases
            .get_mut(scope)
            .ok_or_else(|| QueueError::ResourceMissing {
                scope: scope.to_string(),
            })?;

        if !record.state().allows_acquire() {
            return Err(QueueError::LeaseConflict {
                scope: scope.to_string(),
            });
        }

        let lease_id = LeaseId::new(new_token());
        let expires_at = Timestamp::after(duration);
        record.lease = Some((lease_id.clone(), expires_at));
        record.duration = duration;
        record.broken = false;

        Ok(LockHandle {
            scope: scope.to_string(),
            lease_id,
            expires_at,
        })
    }

    async fn renew_lease(&self, scope: &str, lease_id: &LeaseId) -> Result<Timestamp, QueueError> {
        let mut leases = self.leases()?;
        let record = leases
            .get_mut(scope)
            .ok_or_else(|| QueueError::ResourceMissing {
                scope: scope.to_string(),
            })?;

        if record.broken {
            return Err(QueueError::LeaseLost {
                scope: scope.to_string(),
            });
        }
        if !record.holds(lease_id) {
            return Err(QueueError::LeaseConflict {
                scope: scope.to_string(),
            });
        }

        // Like blob leases, a lapsed lease may be renewed if nobody took it meanwhile
        let expires_at = Timestamp::after(record.duration);
        record.lease = Some((lease_id.clone(), expires_at));
        Ok(expires_at)
    }

    async fn release_lease(&self, scope: &str, lease_id: &LeaseId) -> Result<(), QueueError> {
        let mut leases = self.leases()?;
        let record = leases
            .get_mut(scope)
            .ok_or_else(|| QueueError::ResourceMissing {
                scope: scope.to_string(),
            })?;

        if !record.holds(lease_id) {
            return Err(QueueError::LeaseConflict {
                scope: scope.to_string(),
            });
        }

        record.lease = None;
        Ok(())
    }
}
