//! # Queue Host
//!
//! Lease-aware runtime for at-least-once consumption of messages from queues
//! whose backends only guarantee a bounded visibility timeout.
//!
//! This library provides:
//! - Background renewal of message visibility and lock leases while work runs
//! - Lease-based singleton execution per scope, with retry and backoff
//! - Delete, requeue or dead-letter settlement per message
//! - A batch host in job (drain once) and listener (continuous) modes
//! - In-memory message and lock stores
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for stores, message processing and the host
//! - [`message`] - Message structures, receipt handles and claims
//! - [`store`] - Message store and lock store traits
//! - [`delay`] - Renewal and backoff delay strategies
//! - [`renewal`] - Claim renewal guard
//! - [`lock`] - Distributed lock manager
//! - [`scope`] - Singleton scope expressions
//! - [`singleton`] - Singleton lock manager and executor
//! - [`outcome`] - Per-message outcome handler
//! - [`host`] - Batch host executor
//! - [`config`] - Host run options
//! - [`providers`] - Store implementations

// Module declarations
pub mod config;
pub mod delay;
pub mod error;
pub mod executor;
pub mod host;
pub mod lock;
pub mod message;
pub mod outcome;
pub mod providers;
pub mod renewal;
pub mod scope;
pub mod singleton;
pub mod store;

// Re-export commonly used types at crate root for convenience
pub use config::{HostRunOptions, SingletonOptions};
pub use delay::{DelayStrategy, LinearDelayStrategy, RandomizedExponentialBackoff};
pub use error::{ConfigurationError, HostError, ProcessingError, QueueError, ScopeResolutionError};
pub use executor::MessageExecutor;
pub use host::{BatchHostExecutor, BatchHostExecutorBuilder, HostState, RunSummary};
pub use lock::DistributedLockManager;
pub use message::{Claim, Message, MessageId, ReceiptHandle, ReceivedMessage, Timestamp};
pub use outcome::{MessageOutcome, MessageOutcomeHandler};
pub use providers::{InMemoryLockStore, InMemoryMessageStore};
pub use renewal::{ClaimFault, ClaimRenewer, RenewalGuard};
pub use scope::ScopeExpression;
pub use singleton::{SingletonExecutor, SingletonLockManager};
pub use store::{LeaseId, LeaseState, LockHandle, LockStore, MessageStore};

// Cancellation is part of the public API surface
pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
