//! Error types for store operations, per-message processing and the host loop.

use std::time::Duration;
use thiserror::Error;

/// Errors raised at the message store and lock store boundary
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Message not found or already removed: {message_id}")]
    MessageNotFound { message_id: String },

    #[error("Claim on '{resource}' was rejected: {message}")]
    ClaimRejected { resource: String, message: String },

    #[error("Lease on '{scope}' is held by another owner")]
    LeaseConflict { scope: String },

    #[error("Lease on '{scope}' is no longer held")]
    LeaseLost { scope: String },

    #[error("Lock resource '{scope}' does not exist")]
    ResourceMissing { scope: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),
}

impl QueueError {
    /// Check if error is transient and should be retried by the backend client
    pub fn is_transient(&self) -> bool {
        match self {
            Self::MessageNotFound { .. } => false,
            Self::ClaimRejected { .. } => false,
            Self::LeaseConflict { .. } => true,
            Self::LeaseLost { .. } => false,
            Self::ResourceMissing { .. } => false,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::ProviderError { .. } => true, // Provider-specific errors are usually transient
            Self::Cancelled => false,
            Self::ConfigurationError(_) => false,
        }
    }

    /// Check if the error only reports that the caller gave up
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

/// Failure to derive a singleton scope name from a message
#[derive(Debug, Error)]
pub enum ScopeResolutionError {
    #[error("Scope value '{path}' is not present on message {message_id}")]
    Missing { message_id: String, path: String },

    #[error("Body of message {message_id} is not valid JSON: {source}")]
    InvalidBody {
        message_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Scope value '{path}' on message {message_id} is not a scalar")]
    NotScalar { message_id: String, path: String },
}

/// Failures while processing a single message
///
/// These never escape the per-message boundary; the outcome handler turns
/// them into a requeue or dead-letter decision.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Visibility of message {message_id} could not be extended: {reason}")]
    VisibilityLost { message_id: String, reason: String },

    #[error("Singleton lock on '{scope}' was lost: {reason}")]
    LockLost { scope: String, reason: String },

    #[error("Singleton lock on '{scope}' unavailable after {attempts} attempts")]
    LockUnavailable { scope: String, attempts: u32 },

    #[error("Scope resolution failed: {0}")]
    ScopeResolution(#[from] ScopeResolutionError),

    #[error("Store operation failed: {0}")]
    Store(#[from] QueueError),

    #[error("Processing was cancelled")]
    Cancelled,

    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

impl ProcessingError {
    /// Singleton scope the failure relates to, if any
    pub fn scope(&self) -> Option<&str> {
        match self {
            Self::LockLost { scope, .. } | Self::LockUnavailable { scope, .. } => Some(scope),
            _ => None,
        }
    }
}

/// Host-level failures outside the per-message boundary
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Fetching a batch failed: {0}")]
    Fetch(#[source] QueueError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Message task failed: {message}")]
    TaskFailed { message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
