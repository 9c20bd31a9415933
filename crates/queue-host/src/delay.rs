//! # Delay Strategies
//!
//! Computes the wait before the next renewal, poll or lock attempt.
//!
//! - [`LinearDelayStrategy`] paces claim renewals against a deadline.
//! - [`RandomizedExponentialBackoff`] paces queue polling and lock retries,
//!   with jitter to keep competing consumers from synchronising.

use crate::error::ConfigurationError;
use crate::message::Timestamp;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Jitter applied to each backoff increment (±20%)
pub const JITTER_FACTOR: f64 = 0.2;

/// Strategy for computing the next wait duration
pub trait DelayStrategy: Send {
    /// Delay before the next attempt.
    ///
    /// `previous_succeeded` reports the outcome of the attempt that just
    /// finished (for polling: whether messages were found). `deadline` is the
    /// claim deadline to stay ahead of, where one applies.
    fn next_delay(&mut self, previous_succeeded: bool, deadline: Option<Timestamp>) -> Duration;
}

// ============================================================================
// Linear
// ============================================================================

/// Renewal cadence: wake up halfway to the claim deadline.
///
/// Halving the remaining time means at least one renewal is attempted well
/// before the deadline even as each renewal pushes the deadline out.
#[derive(Debug, Clone)]
pub struct LinearDelayStrategy {
    minimum: Duration,
}

impl LinearDelayStrategy {
    pub fn new(minimum: Duration) -> Self {
        Self { minimum }
    }

    pub fn minimum(&self) -> Duration {
        self.minimum
    }
}

impl DelayStrategy for LinearDelayStrategy {
    fn next_delay(&mut self, previous_succeeded: bool, deadline: Option<Timestamp>) -> Duration {
        if !previous_succeeded {
            return self.minimum;
        }

        match deadline {
            Some(deadline) => (deadline.duration_until() / 2).max(self.minimum),
            None => self.minimum,
        }
    }
}

// ============================================================================
// Randomized exponential backoff
// ============================================================================

/// Poll and retry cadence with randomized exponential growth.
///
/// On failure the interval becomes
/// `min + jitter * delta_backoff * 2^(exponent - 1)` clamped to `max`; once
/// clamped it stays at `max` until a success resets it to `min`.
///
/// # Examples
///
/// ```rust
/// use queue_host::delay::{DelayStrategy, RandomizedExponentialBackoff};
/// use std::time::Duration;
///
/// let mut backoff = RandomizedExponentialBackoff::new(
///     Duration::from_millis(100),
///     Duration::from_secs(60),
///     Duration::from_millis(100),
/// )
/// .unwrap();
///
/// let first = backoff.next_delay(false, None);
/// let second = backoff.next_delay(false, None);
/// assert!(second >= first);
/// assert_eq!(backoff.next_delay(true, None), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct RandomizedExponentialBackoff {
    minimum: Duration,
    maximum: Duration,
    delta_backoff: Duration,
    current: Duration,
    exponent: u32,
    rng: StdRng,
}

impl RandomizedExponentialBackoff {
    /// Create a backoff over `[minimum, maximum]`
    ///
    /// Fails when `minimum > maximum`.
    pub fn new(
        minimum: Duration,
        maximum: Duration,
        delta_backoff: Duration,
    ) -> Result<Self, ConfigurationError> {
        if minimum > maximum {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "minimum interval {:?} must not exceed maximum interval {:?}",
                    minimum, maximum
                ),
            });
        }

        Ok(Self {
            minimum,
            maximum,
            delta_backoff,
            current: minimum,
            exponent: 1,
            rng: StdRng::from_entropy(),
        })
    }

    /// Replace the random source, e.g. with a seeded one for tests
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Interval returned by the most recent call
    pub fn current_interval(&self) -> Duration {
        self.current
    }

    pub fn minimum(&self) -> Duration {
        self.minimum
    }

    pub fn maximum(&self) -> Duration {
        self.maximum
    }
}

impl DelayStrategy for RandomizedExponentialBackoff {
    fn next_delay(&mut self, previous_succeeded: bool, _deadline: Option<Timestamp>) -> Duration {
        if previous_succeeded {
            self.current = self.minimum;
            self.exponent = 1;
            return self.current;
        }

        if self.current == self.maximum {
            return self.current;
        }

        let jitter = self
            .rng
            .gen_range((1.0 - JITTER_FACTOR)..=(1.0 + JITTER_FACTOR));
        let increment_secs = jitter
            * self.delta_backoff.as_secs_f64()
            * 2f64.powi(self.exponent.saturating_sub(1) as i32);
        let candidate_secs = self.minimum.as_secs_f64() + increment_secs;

        match Duration::try_from_secs_f64(candidate_secs) {
            Ok(candidate) if candidate < self.maximum => {
                self.current = candidate;
                self.exponent = self.exponent.saturating_add(1);
            }
            _ => self.current = self.maximum,
        }

        self.current
    }
}

#[cfg(test)]
#[path = "delay_tests.rs"]
mod tests;
