//! # Batch Host Executor
//!
//! Fetches batches from a [`MessageStore`] and fans each message out to a
//! [`MessageOutcomeHandler`] task.
//!
//! Two run modes are offered:
//!
//! - [`BatchHostExecutor::run_once`] (job mode) drains a single batch and
//!   stops. Host-level failures are returned as errors.
//! - [`BatchHostExecutor::run_until_cancelled`] (listener mode) keeps
//!   fetching until cancelled. The next batch is fetched once the number of
//!   unfinished messages drops to the new-batch threshold, and the poll delay
//!   backs off while the queue is empty. Host-level failures are logged and
//!   the loop carries on.
//!
//! All in-flight tasks live in a [`JoinSet`] owned by the running loop.

use crate::config::HostRunOptions;
use crate::delay::{DelayStrategy, RandomizedExponentialBackoff};
use crate::error::{ConfigurationError, HostError};
use crate::executor::MessageExecutor;
use crate::message::ReceivedMessage;
use crate::outcome::{MessageOutcome, MessageOutcomeHandler};
use crate::singleton::{SingletonExecutor, SingletonLockManager};
use crate::store::{LockStore, MessageStore};
use rand::rngs::StdRng;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Observable position of the host loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Idle,
    Fetching,
    Dispatching,
    /// Waiting for in-flight messages to finish
    Draining,
    /// Sleeping before the next poll
    Waiting,
    Stopped,
}

/// Counts of what a run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Non-empty batches fetched
    pub batches: u32,
    pub fetched: usize,
    pub deleted: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
    pub unsettled: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Deleted => self.deleted += 1,
            MessageOutcome::Requeued => self.requeued += 1,
            MessageOutcome::DeadLettered => self.dead_lettered += 1,
            MessageOutcome::Unsettled { .. } => self.unsettled += 1,
        }
    }

    /// Messages whose processing finished and was observed by the loop
    pub fn completed(&self) -> usize {
        self.deleted + self.requeued + self.dead_lettered + self.unsettled
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`BatchHostExecutor`]
#[derive(Default)]
pub struct BatchHostExecutorBuilder {
    store: Option<Arc<dyn MessageStore>>,
    executor: Option<Arc<dyn MessageExecutor>>,
    lock_store: Option<Arc<dyn LockStore>>,
    options: HostRunOptions,
    poll_rng: Option<StdRng>,
}

impl BatchHostExecutorBuilder {
    pub fn message_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn MessageExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Lease backend, required when singleton options are set
    pub fn lock_store(mut self, lock_store: Arc<dyn LockStore>) -> Self {
        self.lock_store = Some(lock_store);
        self
    }

    pub fn options(mut self, options: HostRunOptions) -> Self {
        self.options = options;
        self
    }

    /// Seed the poll backoff jitter
    pub fn poll_rng(mut self, rng: StdRng) -> Self {
        self.poll_rng = Some(rng);
        self
    }

    pub fn build(self) -> Result<BatchHostExecutor, ConfigurationError> {
        let options = self.options;
        options.validate()?;

        let store = self.store.ok_or_else(|| ConfigurationError::Missing {
            key: "message_store".to_string(),
        })?;
        let mut executor = self.executor.ok_or_else(|| ConfigurationError::Missing {
            key: "executor".to_string(),
        })?;

        if let Some(singleton) = &options.singleton {
            let lock_store = self.lock_store.ok_or_else(|| ConfigurationError::Missing {
                key: "lock_store".to_string(),
            })?;
            let locks = SingletonLockManager::new(lock_store, singleton)?;

            info!(scope = %singleton.scope, "Singleton execution enabled");
            executor = Arc::new(
                SingletonExecutor::new(executor, Arc::new(locks))
                    .with_renewal_min_interval(options.renewal_min_interval()),
            );
        }

        let mut poll_backoff = RandomizedExponentialBackoff::new(
            options.min_poll_interval(),
            options.max_poll_interval(),
            options.delta_backoff(),
        )?;
        if let Some(rng) = self.poll_rng {
            poll_backoff = poll_backoff.with_rng(rng);
        }

        let mut handler = MessageOutcomeHandler::new(
            Arc::clone(&store),
            executor,
            options.visibility_timeout(),
            options.max_dequeue_count,
        )
        .with_renewal_min_interval(options.renewal_min_interval());
        if let Some(singleton) = &options.singleton {
            handler = handler.with_scope(singleton.scope.clone());
        }

        let (state, _) = watch::channel(HostState::Idle);

        Ok(BatchHostExecutor {
            store,
            handler: Arc::new(handler),
            options,
            poll_backoff,
            state,
        })
    }
}

// ============================================================================
// Batch Host Executor
// ============================================================================

/// Fetch, dispatch and settle loop over one message store
pub struct BatchHostExecutor {
    store: Arc<dyn MessageStore>,
    handler: Arc<MessageOutcomeHandler>,
    options: HostRunOptions,
    poll_backoff: RandomizedExponentialBackoff,
    state: watch::Sender<HostState>,
}

impl BatchHostExecutor {
    pub fn builder() -> BatchHostExecutorBuilder {
        BatchHostExecutorBuilder::default()
    }

    pub fn options(&self) -> &HostRunOptions {
        &self.options
    }

    /// Current loop state
    pub fn state(&self) -> HostState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<HostState> {
        self.state.subscribe()
    }

    fn transition(&self, next: HostState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "Host state changed");
        }
    }

    /// Drain one batch and stop.
    ///
    /// A failed fetch or a panicking message task is returned as an error,
    /// after every other dispatched message has finished.
    pub async fn run_once(&self, cancellation: &CancellationToken) -> Result<RunSummary, HostError> {
        let mut summary = RunSummary::default();

        self.transition(HostState::Fetching);
        let fetched = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                self.transition(HostState::Stopped);
                return Ok(summary);
            }
            result = self.fetch() => result,
        };

        let batch = match fetched {
            Ok(batch) => batch,
            Err(error) => {
                error!(error = %error, "Fetching batch failed; stopping job");
                self.transition(HostState::Stopped);
                return Err(error);
            }
        };

        if batch.is_empty() {
            info!("Queue is empty; nothing to process");
            self.transition(HostState::Stopped);
            return Ok(summary);
        }

        summary.batches += 1;
        summary.fetched += batch.len();

        self.transition(HostState::Dispatching);
        let mut in_flight = JoinSet::new();
        for message in batch {
            self.dispatch(&mut in_flight, message, cancellation);
        }

        self.transition(HostState::Draining);
        let mut first_failure = None;
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(outcome) => summary.record(&outcome),
                Err(join_error) => {
                    error!(error = %join_error, "Message task failed");
                    if first_failure.is_none() {
                        first_failure = Some(task_failed(join_error));
                    }
                }
            }
        }

        self.transition(HostState::Stopped);
        info!(
            fetched = summary.fetched,
            deleted = summary.deleted,
            requeued = summary.requeued,
            dead_lettered = summary.dead_lettered,
            unsettled = summary.unsettled,
            "Job run complete"
        );

        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(summary),
        }
    }

    /// Fetch and dispatch until `cancellation` fires.
    ///
    /// Messages still in flight at cancellation are left running; they see
    /// the same cancellation and settle themselves.
    pub async fn run_until_cancelled(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<RunSummary, HostError> {
        let threshold = self.options.effective_new_batch_threshold() as usize;
        let mut backoff = self.poll_backoff.clone();
        let mut in_flight = JoinSet::new();
        let mut summary = RunSummary::default();

        info!(
            batch_size = self.options.batch_size,
            new_batch_threshold = threshold,
            singleton = self.options.is_singleton(),
            "Listener started"
        );

        'listen: loop {
            self.transition(HostState::Fetching);
            let fetched = tokio::select! {
                biased;
                _ = cancellation.cancelled() => break 'listen,
                result = self.fetch() => result,
            };

            let messages_found = match fetched {
                Ok(batch) => {
                    let found = !batch.is_empty();
                    if found {
                        summary.batches += 1;
                        summary.fetched += batch.len();

                        self.transition(HostState::Dispatching);
                        for message in batch {
                            self.dispatch(&mut in_flight, message, cancellation);
                        }
                    }
                    found
                }
                Err(error) => {
                    warn!(error = %error, "Fetching batch failed; retrying after backoff");
                    false
                }
            };

            while let Some(joined) = in_flight.try_join_next() {
                record_joined(&mut summary, joined);
            }

            self.transition(HostState::Draining);
            'drain: while in_flight.len() > threshold {
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => break 'listen,
                    joined = in_flight.join_next() => match joined {
                        Some(joined) => record_joined(&mut summary, joined),
                        None => break 'drain,
                    },
                }
            }

            self.transition(HostState::Waiting);
            let delay = backoff.next_delay(messages_found, None);
            debug!(
                delay_ms = delay.as_millis() as u64,
                in_flight = in_flight.len(),
                messages_found = messages_found,
                "Waiting before next poll"
            );

            tokio::select! {
                _ = cancellation.cancelled() => break 'listen,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let stragglers = in_flight.len();
        in_flight.detach_all();
        self.transition(HostState::Stopped);

        info!(
            fetched = summary.fetched,
            completed = summary.completed(),
            detached = stragglers,
            "Listener stopped"
        );
        Ok(summary)
    }

    async fn fetch(&self) -> Result<Vec<ReceivedMessage>, HostError> {
        let batch = self
            .store
            .fetch_batch(self.options.batch_size, self.options.visibility_timeout())
            .await
            .map_err(HostError::Fetch)?;

        debug!(count = batch.len(), "Fetched batch");
        Ok(batch)
    }

    fn dispatch(
        &self,
        in_flight: &mut JoinSet<MessageOutcome>,
        message: ReceivedMessage,
        cancellation: &CancellationToken,
    ) {
        let handler = Arc::clone(&self.handler);
        let cancellation = cancellation.clone();
        in_flight.spawn(async move { handler.handle(message, &cancellation).await });
    }
}

fn record_joined(summary: &mut RunSummary, joined: Result<MessageOutcome, JoinError>) {
    match joined {
        Ok(outcome) => summary.record(&outcome),
        Err(join_error) => error!(error = %join_error, "Message task failed; continuing"),
    }
}

fn task_failed(join_error: JoinError) -> HostError {
    HostError::TaskFailed {
        message: join_error.to_string(),
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
