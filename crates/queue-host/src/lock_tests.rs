//! Tests for the distributed lock manager

use super::*;
use crate::message::Timestamp;
use crate::providers::InMemoryLockStore;
use crate::store::LeaseId;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

const LEASE: Duration = Duration::from_secs(60);

fn manager(store: Arc<dyn LockStore>) -> DistributedLockManager {
    DistributedLockManager::new(store, LEASE)
}

// ============================================================================
// Scripted Lock Store
// ============================================================================

/// Lock store whose answers are scripted per call
struct ScriptedLockStore {
    states: Mutex<Vec<LeaseState>>,
    acquire_results: Mutex<Vec<Result<LockHandle, QueueError>>>,
    release_result: fn() -> Result<(), QueueError>,
    creates: AtomicU32,
    acquires: AtomicU32,
    renews: AtomicU32,
}

impl ScriptedLockStore {
    fn new(states: Vec<LeaseState>) -> Self {
        Self {
            states: Mutex::new(states),
            acquire_results: Mutex::new(Vec::new()),
            release_result: || Ok(()),
            creates: AtomicU32::new(0),
            acquires: AtomicU32::new(0),
            renews: AtomicU32::new(0),
        }
    }

    fn with_acquire_results(self, results: Vec<Result<LockHandle, QueueError>>) -> Self {
        *self.acquire_results.lock().unwrap() = results;
        self
    }

    fn with_release_result(mut self, result: fn() -> Result<(), QueueError>) -> Self {
        self.release_result = result;
        self
    }
}

fn handle(scope: &str) -> LockHandle {
    LockHandle {
        scope: scope.to_string(),
        lease_id: LeaseId::new("lease-1".to_string()),
        expires_at: Timestamp::after(LEASE),
    }
}

#[async_trait]
impl LockStore for ScriptedLockStore {
    async fn lease_state(&self, _scope: &str) -> Result<LeaseState, QueueError> {
        let mut states = self.states.lock().unwrap();
        if states.len() > 1 {
            Ok(states.remove(0))
        } else {
            Ok(states[0])
        }
    }

    async fn create_if_missing(&self, _scope: &str) -> Result<(), QueueError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn acquire_lease(
        &self,
        scope: &str,
        _duration: Duration,
    ) -> Result<LockHandle, QueueError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        let mut results = self.acquire_results.lock().unwrap();
        if results.is_empty() {
            Ok(handle(scope))
        } else {
            results.remove(0)
        }
    }

    async fn renew_lease(&self, _scope: &str, _lease_id: &LeaseId) -> Result<Timestamp, QueueError> {
        self.renews.fetch_add(1, Ordering::SeqCst);
        Ok(Timestamp::after(LEASE))
    }

    async fn release_lease(&self, _scope: &str, _lease_id: &LeaseId) -> Result<(), QueueError> {
        (self.release_result)()
    }
}

// ============================================================================
// Acquire
// ============================================================================

#[tokio::test]
async fn test_acquire_creates_missing_resource_and_retries_once() {
    let store = Arc::new(InMemoryLockStore::new());
    let locks = manager(store.clone());

    let handle = locks.try_acquire("G1").await.unwrap();

    assert!(handle.is_some());
    assert_eq!(store.lease_state("G1").await.unwrap(), LeaseState::Leased);
}

#[tokio::test]
async fn test_acquire_of_held_lease_is_unavailable_not_error() {
    let store = Arc::new(InMemoryLockStore::new());
    let locks = manager(store);

    let first = locks.try_acquire("G1").await.unwrap();
    let second = locks.try_acquire("G1").await.unwrap();

    assert!(first.is_some());
    assert!(second.is_none());
}

#[tokio::test]
async fn test_acquire_in_each_free_state() {
    for state in [LeaseState::Available, LeaseState::Expired, LeaseState::Broken] {
        let store = Arc::new(ScriptedLockStore::new(vec![state]));
        let locks = manager(store.clone());

        assert!(locks.try_acquire("G1").await.unwrap().is_some(), "{:?}", state);
        assert_eq!(store.creates.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn test_acquire_tolerates_concurrent_creator() {
    // Missing on first read; a rival creates and takes the lease before our retry
    let store = Arc::new(ScriptedLockStore::new(vec![
        LeaseState::Missing,
        LeaseState::Leased,
    ]));
    let locks = manager(store.clone());

    let result = locks.try_acquire("G1").await.unwrap();

    assert!(result.is_none());
    assert_eq!(store.creates.load(Ordering::SeqCst), 1);
    assert_eq!(store.acquires.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_acquire_retries_missing_resource_only_once() {
    let store = Arc::new(ScriptedLockStore::new(vec![LeaseState::Missing]));
    let locks = manager(store.clone());

    let result = locks.try_acquire("G1").await.unwrap();

    assert!(result.is_none());
    assert_eq!(store.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_acquire_race_lost_is_unavailable() {
    let store = Arc::new(
        ScriptedLockStore::new(vec![LeaseState::Available]).with_acquire_results(vec![Err(
            QueueError::LeaseConflict {
                scope: "G1".to_string(),
            },
        )]),
    );
    let locks = manager(store);

    assert!(locks.try_acquire("G1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_acquire_propagates_backend_errors() {
    let store = Arc::new(
        ScriptedLockStore::new(vec![LeaseState::Available]).with_acquire_results(vec![Err(
            QueueError::ConnectionFailed {
                message: "reset".to_string(),
            },
        )]),
    );
    let locks = manager(store);

    assert!(matches!(
        locks.try_acquire("G1").await,
        Err(QueueError::ConnectionFailed { .. })
    ));
}

// ============================================================================
// Renew
// ============================================================================

#[tokio::test]
async fn test_renew_refuses_lease_that_is_no_longer_held() {
    for state in [
        LeaseState::Available,
        LeaseState::Expired,
        LeaseState::Broken,
        LeaseState::Missing,
    ] {
        let store = Arc::new(ScriptedLockStore::new(vec![state]));
        let locks = manager(store.clone());

        let result = locks.renew(&handle("G1")).await;

        assert!(
            matches!(result, Err(QueueError::LeaseLost { .. })),
            "{:?}",
            state
        );
        assert_eq!(store.renews.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn test_renew_after_expiry_is_lost_even_if_backend_would_allow_it() {
    let store = Arc::new(InMemoryLockStore::new());
    let locks = DistributedLockManager::new(store.clone(), Duration::from_millis(20));
    let held = locks.try_acquire("G1").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(40)).await;

    assert!(matches!(
        locks.renew(&held).await,
        Err(QueueError::LeaseLost { .. })
    ));
}

#[tokio::test]
async fn test_renew_returns_new_deadline() {
    let store = Arc::new(InMemoryLockStore::new());
    let locks = DistributedLockManager::new(store, Duration::from_millis(500));
    let held = locks.try_acquire("G1").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let renewed = locks.renew(&held).await.unwrap();

    assert_eq!(renewed.lease_id, held.lease_id);
    assert!(renewed.expires_at > held.expires_at);
}

// ============================================================================
// Release
// ============================================================================

#[tokio::test]
async fn test_release_frees_the_scope() {
    let store = Arc::new(InMemoryLockStore::new());
    let locks = manager(store.clone());
    let held = locks.try_acquire("G1").await.unwrap().unwrap();

    locks.release(&held).await.unwrap();

    assert_eq!(store.lease_state("G1").await.unwrap(), LeaseState::Available);
    assert!(locks.try_acquire("G1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_release_treats_missing_and_conflict_as_success() {
    let missing = ScriptedLockStore::new(vec![LeaseState::Missing]).with_release_result(|| {
        Err(QueueError::ResourceMissing {
            scope: "G1".to_string(),
        })
    });
    assert!(manager(Arc::new(missing)).release(&handle("G1")).await.is_ok());

    let conflict = ScriptedLockStore::new(vec![LeaseState::Leased]).with_release_result(|| {
        Err(QueueError::LeaseConflict {
            scope: "G1".to_string(),
        })
    });
    assert!(manager(Arc::new(conflict)).release(&handle("G1")).await.is_ok());
}

#[tokio::test]
async fn test_release_propagates_other_errors() {
    let failing = ScriptedLockStore::new(vec![LeaseState::Leased]).with_release_result(|| {
        Err(QueueError::ConnectionFailed {
            message: "unreachable".to_string(),
        })
    });

    assert!(matches!(
        manager(Arc::new(failing)).release(&handle("G1")).await,
        Err(QueueError::ConnectionFailed { .. })
    ));
}
