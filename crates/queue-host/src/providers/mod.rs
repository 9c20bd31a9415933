//! Store implementations.
//!
//! This module contains concrete implementations of the `MessageStore` and
//! `LockStore` traits. Cloud backends live in their own adapter crates.

pub mod memory;

pub use memory::{DeadLetteredMessage, InMemoryLockStore, InMemoryMessageStore};
