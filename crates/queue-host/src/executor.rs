//! The per-message function boundary.

use crate::error::ProcessingError;
use crate::message::ReceivedMessage;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Business logic executed for each message.
///
/// Implementations must be idempotent: delivery is at-least-once. The
/// cancellation token fires when the host shuts down or when the claim
/// guarding this execution can no longer be kept.
#[async_trait]
pub trait MessageExecutor: Send + Sync {
    async fn execute(
        &self,
        message: &ReceivedMessage,
        cancellation: CancellationToken,
    ) -> Result<(), ProcessingError>;
}

#[async_trait]
impl<T: MessageExecutor + ?Sized> MessageExecutor for std::sync::Arc<T> {
    async fn execute(
        &self,
        message: &ReceivedMessage,
        cancellation: CancellationToken,
    ) -> Result<(), ProcessingError> {
        (**self).execute(message, cancellation).await
    }
}
