//! # Message Outcome
//!
//! Runs the executor for one message while keeping the message hidden, then
//! settles it: delete on success, return it to the queue on failure, or move
//! it to the dead letter queue once its dequeue budget is spent.
//!
//! Failures stop here. The batch host only sees the resulting
//! [`MessageOutcome`], so one poisoned message never aborts its siblings.

use crate::delay::LinearDelayStrategy;
use crate::error::{ProcessingError, QueueError};
use crate::executor::MessageExecutor;
use crate::message::{MessageId, ReceiptHandle, ReceivedMessage};
use crate::renewal::{ClaimFault, ClaimRenewer, RenewalGuard};
use crate::scope::ScopeExpression;
use crate::store::MessageStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a message was settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Processed and removed from the queue
    Deleted,
    /// Failed and returned to the queue for another attempt
    Requeued,
    /// Failed on its last allowed delivery and moved to the dead letter queue
    DeadLettered,
    /// Settling failed; the message reappears once its visibility lapses
    Unsettled { reason: String },
}

/// Extends message visibility for a [`RenewalGuard`]
struct VisibilityRenewer {
    store: Arc<dyn MessageStore>,
    message_id: MessageId,
    visibility_timeout: Duration,
}

#[async_trait]
impl ClaimRenewer<ReceiptHandle> for VisibilityRenewer {
    async fn renew(&self, claim: &ReceiptHandle) -> Result<ReceiptHandle, QueueError> {
        self.store
            .extend_visibility(&self.message_id, claim, self.visibility_timeout)
            .await
    }

    fn resource(&self) -> &str {
        self.message_id.as_str()
    }
}

/// Per-message processing with visibility renewal and settlement policy
pub struct MessageOutcomeHandler {
    store: Arc<dyn MessageStore>,
    executor: Arc<dyn MessageExecutor>,
    visibility_timeout: Duration,
    max_dequeue_count: u32,
    renewal_min_interval: Duration,
    scope: Option<ScopeExpression>,
}

impl MessageOutcomeHandler {
    pub fn new(
        store: Arc<dyn MessageStore>,
        executor: Arc<dyn MessageExecutor>,
        visibility_timeout: Duration,
        max_dequeue_count: u32,
    ) -> Self {
        Self {
            store,
            executor,
            visibility_timeout,
            max_dequeue_count,
            renewal_min_interval: Duration::from_secs(1),
            scope: None,
        }
    }

    /// Set the floor for the visibility renewal cadence
    pub fn with_renewal_min_interval(mut self, interval: Duration) -> Self {
        self.renewal_min_interval = interval;
        self
    }

    /// Label outcome logs with the singleton scope resolved by `scope`
    pub fn with_scope(mut self, scope: ScopeExpression) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Scope recorded with a message's outcome. Empty when no scope is
    /// configured or it does not resolve.
    pub(crate) fn scope_label(
        &self,
        message: &ReceivedMessage,
        failure: Option<&ProcessingError>,
    ) -> String {
        if let Some(scope) = failure.and_then(ProcessingError::scope) {
            return scope.to_string();
        }
        self.scope
            .as_ref()
            .and_then(|expression| expression.resolve(message).ok())
            .unwrap_or_default()
    }

    /// Process `message` and settle it.
    ///
    /// Never fails: every error is turned into a [`MessageOutcome`].
    pub async fn handle(
        &self,
        mut message: ReceivedMessage,
        cancellation: &CancellationToken,
    ) -> MessageOutcome {
        debug!(
            message_id = %message.message_id,
            dequeue_count = message.dequeue_count,
            "Processing message"
        );

        let fault = ClaimFault::new(cancellation.child_token());
        let guard = RenewalGuard::start(
            message.receipt_handle.clone(),
            LinearDelayStrategy::new(self.renewal_min_interval),
            Arc::new(VisibilityRenewer {
                store: Arc::clone(&self.store),
                message_id: message.message_id.clone(),
                visibility_timeout: self.visibility_timeout,
            }),
            fault.clone(),
            cancellation,
        );

        let work_token = fault.token().clone();
        let mut result = tokio::select! {
            biased;
            result = self.executor.execute(&message, work_token.clone()) => result,
            _ = work_token.cancelled() => Err(ProcessingError::Cancelled),
        };

        if result.is_err() {
            if let Some(reason) = fault.reason() {
                result = Err(ProcessingError::VisibilityLost {
                    message_id: message.message_id.to_string(),
                    reason: reason.to_string(),
                });
            }
        }

        // Settle with the receipt from the most recent extension
        message.receipt_handle = guard.stop().await;

        let scope = self.scope_label(&message, result.as_ref().err());
        match result {
            Ok(()) => self.complete(&message, &scope).await,
            Err(ProcessingError::Cancelled) if cancellation.is_cancelled() => {
                self.abandon(&message, &scope).await
            }
            Err(failure) => self.fail(&message, &failure, &scope).await,
        }
    }

    async fn complete(&self, message: &ReceivedMessage, scope: &str) -> MessageOutcome {
        match self.store.delete(message).await {
            Ok(()) | Err(QueueError::MessageNotFound { .. }) => {
                info!(
                    message_id = %message.message_id,
                    scope = %scope,
                    "Message processed and deleted"
                );
                MessageOutcome::Deleted
            }
            Err(error) => {
                warn!(
                    message_id = %message.message_id,
                    scope = %scope,
                    error = %error,
                    "Message processed but could not be deleted; it will be redelivered"
                );
                MessageOutcome::Unsettled {
                    reason: error.to_string(),
                }
            }
        }
    }

    async fn fail(
        &self,
        message: &ReceivedMessage,
        failure: &ProcessingError,
        scope: &str,
    ) -> MessageOutcome {
        if message.has_exhausted_dequeue_count(self.max_dequeue_count) {
            return self.dead_letter(message, failure, scope).await;
        }

        match self.store.make_visible(message).await {
            Ok(()) => {
                warn!(
                    message_id = %message.message_id,
                    scope = %scope,
                    dequeue_count = message.dequeue_count,
                    max_dequeue_count = self.max_dequeue_count,
                    error = %failure,
                    "Message processing failed; requeued"
                );
                MessageOutcome::Requeued
            }
            Err(error) => {
                warn!(
                    message_id = %message.message_id,
                    scope = %scope,
                    error = %failure,
                    settle_error = %error,
                    "Message processing failed and could not be requeued"
                );
                MessageOutcome::Unsettled {
                    reason: error.to_string(),
                }
            }
        }
    }

    async fn dead_letter(
        &self,
        message: &ReceivedMessage,
        failure: &ProcessingError,
        scope: &str,
    ) -> MessageOutcome {
        if let Err(error) = self
            .store
            .move_to_dead_letter(message, &failure.to_string())
            .await
        {
            error!(
                message_id = %message.message_id,
                scope = %scope,
                error = %failure,
                settle_error = %error,
                "Message exhausted its dequeue budget but could not be dead-lettered"
            );
            return MessageOutcome::Unsettled {
                reason: error.to_string(),
            };
        }

        match self.store.delete(message).await {
            Ok(()) | Err(QueueError::MessageNotFound { .. }) => {}
            Err(error) => {
                // Already copied; a redelivery lands in the dead letter queue again
                warn!(
                    message_id = %message.message_id,
                    scope = %scope,
                    error = %error,
                    "Dead-lettered message could not be removed from the queue"
                );
            }
        }

        error!(
            message_id = %message.message_id,
            scope = %scope,
            dequeue_count = message.dequeue_count,
            error = %failure,
            "Message moved to dead letter queue"
        );
        MessageOutcome::DeadLettered
    }

    /// Shutdown interrupted the work; hand the message back without spending
    /// its dequeue budget on a dead-letter decision
    async fn abandon(&self, message: &ReceivedMessage, scope: &str) -> MessageOutcome {
        match self.store.make_visible(message).await {
            Ok(()) => {
                info!(
                    message_id = %message.message_id,
                    scope = %scope,
                    "Processing interrupted by shutdown; message requeued"
                );
                MessageOutcome::Requeued
            }
            Err(error) => {
                warn!(
                    message_id = %message.message_id,
                    scope = %scope,
                    error = %error,
                    "Processing interrupted by shutdown; message left to time out"
                );
                MessageOutcome::Unsettled {
                    reason: error.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "outcome_tests.rs"]
mod tests;
