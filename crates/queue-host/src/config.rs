//! Host run options.
//!
//! Durations are carried as milliseconds so the options load from YAML, TOML
//! or environment variables without a custom deserializer.

use crate::error::ConfigurationError;
use crate::scope::ScopeExpression;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for a [`BatchHostExecutor`](crate::host::BatchHostExecutor) run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostRunOptions {
    /// Messages fetched per batch
    pub batch_size: u32,
    /// How long fetched messages stay hidden before renewal is needed
    pub visibility_timeout_ms: u64,
    /// Deliveries after which a failing message is dead-lettered
    pub max_dequeue_count: u32,
    pub min_poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    pub delta_backoff_ms: u64,
    /// In-flight count at or below which the next batch is fetched.
    /// Defaults to half the batch size, rounded up.
    pub new_batch_threshold: Option<u32>,
    /// Floor for the visibility renewal cadence
    pub renewal_min_interval_ms: u64,
    /// Enables singleton execution when present
    pub singleton: Option<SingletonOptions>,
}

impl Default for HostRunOptions {
    fn default() -> Self {
        Self {
            batch_size: 16,
            visibility_timeout_ms: 30_000,
            max_dequeue_count: 5,
            min_poll_interval_ms: 100,
            max_poll_interval_ms: 60_000,
            delta_backoff_ms: 100,
            new_batch_threshold: None,
            renewal_min_interval_ms: 1_000,
            singleton: None,
        }
    }
}

impl HostRunOptions {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }

    pub fn delta_backoff(&self) -> Duration {
        Duration::from_millis(self.delta_backoff_ms)
    }

    pub fn renewal_min_interval(&self) -> Duration {
        Duration::from_millis(self.renewal_min_interval_ms)
    }

    pub fn is_singleton(&self) -> bool {
        self.singleton.is_some()
    }

    /// Threshold the listener loop waits for before fetching again.
    ///
    /// Singleton mode always drains the whole batch first; otherwise the
    /// configured value is used, capped at the batch size.
    pub fn effective_new_batch_threshold(&self) -> u32 {
        if self.is_singleton() {
            return 0;
        }

        self.new_batch_threshold
            .unwrap_or_else(|| self.batch_size.div_ceil(2))
            .min(self.batch_size)
    }

    /// Check option values against each other
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be at least 1"));
        }
        if self.visibility_timeout_ms == 0 {
            return Err(invalid("visibility_timeout_ms must be greater than zero"));
        }
        if self.max_dequeue_count == 0 {
            return Err(invalid("max_dequeue_count must be at least 1"));
        }
        if self.min_poll_interval_ms > self.max_poll_interval_ms {
            return Err(invalid(
                "min_poll_interval_ms must not exceed max_poll_interval_ms",
            ));
        }
        if let Some(threshold) = self.new_batch_threshold {
            if threshold > self.batch_size {
                return Err(invalid("new_batch_threshold must not exceed batch_size"));
            }
        }
        check_renewal_floor(
            "visibility_timeout_ms",
            self.visibility_timeout_ms,
            self.renewal_min_interval_ms,
        )?;
        if let Some(singleton) = &self.singleton {
            singleton.validate()?;
            singleton.validate_renewal_floor(self.renewal_min_interval())?;
        }
        Ok(())
    }
}

/// Singleton execution options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SingletonOptions {
    pub scope: ScopeExpression,
    /// Lease length, independent of the visibility timeout
    pub lease_duration_ms: u64,
    /// Acquire attempts before giving up on a message
    pub max_retries: u32,
    pub min_retry_interval_ms: u64,
    pub max_retry_interval_ms: u64,
    pub delta_retry_backoff_ms: u64,
}

impl Default for SingletonOptions {
    fn default() -> Self {
        Self {
            scope: ScopeExpression::default(),
            lease_duration_ms: 60_000,
            max_retries: 10,
            min_retry_interval_ms: 250,
            max_retry_interval_ms: 5_000,
            delta_retry_backoff_ms: 250,
        }
    }
}

impl SingletonOptions {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn min_retry_interval(&self) -> Duration {
        Duration::from_millis(self.min_retry_interval_ms)
    }

    pub fn max_retry_interval(&self) -> Duration {
        Duration::from_millis(self.max_retry_interval_ms)
    }

    pub fn delta_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.delta_retry_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.scope.validate()?;

        if self.lease_duration_ms == 0 {
            return Err(invalid("singleton.lease_duration_ms must be greater than zero"));
        }
        if self.max_retries == 0 {
            return Err(invalid("singleton.max_retries must be at least 1"));
        }
        if self.min_retry_interval_ms > self.max_retry_interval_ms {
            return Err(invalid(
                "singleton.min_retry_interval_ms must not exceed singleton.max_retry_interval_ms",
            ));
        }
        Ok(())
    }

    /// Check that a lease renewed no more often than `renewal_min_interval`
    /// is still renewed before it expires
    pub fn validate_renewal_floor(
        &self,
        renewal_min_interval: Duration,
    ) -> Result<(), ConfigurationError> {
        let floor_ms = u64::try_from(renewal_min_interval.as_millis()).unwrap_or(u64::MAX);
        check_renewal_floor("singleton.lease_duration_ms", self.lease_duration_ms, floor_ms)
    }
}

fn invalid(message: &str) -> ConfigurationError {
    ConfigurationError::Invalid {
        message: message.to_string(),
    }
}

// The first renewal waits at least the floor, so the floor must leave room
// for a renewal before the claim expires.
fn check_renewal_floor(
    lifetime_key: &str,
    lifetime_ms: u64,
    floor_ms: u64,
) -> Result<(), ConfigurationError> {
    if floor_ms.saturating_mul(2) >= lifetime_ms {
        return Err(ConfigurationError::Invalid {
            message: format!(
                "renewal_min_interval_ms ({}) must be less than half of {} ({})",
                floor_ms, lifetime_key, lifetime_ms
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
