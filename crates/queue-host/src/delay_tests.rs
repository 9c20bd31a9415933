//! Tests for delay strategies

use super::*;

fn seeded(min_ms: u64, max_ms: u64, delta_ms: u64, seed: u64) -> RandomizedExponentialBackoff {
    RandomizedExponentialBackoff::new(
        Duration::from_millis(min_ms),
        Duration::from_millis(max_ms),
        Duration::from_millis(delta_ms),
    )
    .unwrap()
    .with_rng(StdRng::seed_from_u64(seed))
}

// ============================================================================
// LinearDelayStrategy Tests
// ============================================================================

#[test]
fn test_linear_waits_half_the_remaining_time() {
    let mut strategy = LinearDelayStrategy::new(Duration::from_secs(1));
    let deadline = Timestamp::after(Duration::from_secs(60));

    let delay = strategy.next_delay(true, Some(deadline));

    // Slightly under 30s because time passes between creating the deadline and asking
    assert!(delay <= Duration::from_secs(30));
    assert!(delay >= Duration::from_secs(29), "delay {:?}", delay);
}

#[test]
fn test_linear_floors_at_minimum() {
    let mut strategy = LinearDelayStrategy::new(Duration::from_secs(1));

    let near = Timestamp::after(Duration::from_millis(500));
    assert_eq!(strategy.next_delay(true, Some(near)), Duration::from_secs(1));

    let passed = Timestamp::now();
    assert_eq!(strategy.next_delay(true, Some(passed)), Duration::from_secs(1));
}

#[test]
fn test_linear_returns_minimum_after_failure() {
    let mut strategy = LinearDelayStrategy::new(Duration::from_millis(250));
    let deadline = Timestamp::after(Duration::from_secs(600));

    assert_eq!(
        strategy.next_delay(false, Some(deadline)),
        Duration::from_millis(250)
    );
}

#[test]
fn test_linear_without_deadline_returns_minimum() {
    let mut strategy = LinearDelayStrategy::new(Duration::from_millis(250));
    assert_eq!(strategy.next_delay(true, None), Duration::from_millis(250));
}

// ============================================================================
// RandomizedExponentialBackoff Tests
// ============================================================================

#[test]
fn test_backoff_rejects_minimum_above_maximum() {
    let result = RandomizedExponentialBackoff::new(
        Duration::from_secs(10),
        Duration::from_secs(1),
        Duration::from_secs(1),
    );

    assert!(matches!(result, Err(ConfigurationError::Invalid { .. })));
}

#[test]
fn test_backoff_accepts_equal_bounds() {
    let mut backoff = seeded(500, 500, 100, 7);

    assert_eq!(backoff.next_delay(false, None), Duration::from_millis(500));
    assert_eq!(backoff.next_delay(false, None), Duration::from_millis(500));
    assert_eq!(backoff.next_delay(true, None), Duration::from_millis(500));
}

#[test]
fn test_backoff_grows_then_saturates() {
    // min=1ms, max=1000ms, five consecutive failures
    let mut backoff = seeded(1, 1000, 100, 42);

    let delays: Vec<Duration> = (0..5).map(|_| backoff.next_delay(false, None)).collect();

    for pair in delays.windows(2) {
        assert!(
            pair[1] > pair[0] || pair[1] == Duration::from_millis(1000),
            "delays must increase until saturation: {:?}",
            delays
        );
    }
    assert_eq!(delays[4], Duration::from_millis(1000));
    assert_eq!(backoff.next_delay(false, None), Duration::from_millis(1000));
}

#[test]
fn test_backoff_first_failure_within_jitter_bounds() {
    for seed in 0..20 {
        let mut backoff = seeded(100, 60_000, 1000, seed);
        let delay = backoff.next_delay(false, None);

        // min + [0.8, 1.2] * delta
        assert!(delay >= Duration::from_millis(900), "delay {:?}", delay);
        assert!(delay <= Duration::from_millis(1300), "delay {:?}", delay);
    }
}

#[test]
fn test_backoff_is_non_decreasing_under_failure() {
    for seed in 0..50 {
        let mut backoff = seeded(10, 30_000, 10, seed);
        let mut previous = Duration::ZERO;

        for _ in 0..20 {
            let delay = backoff.next_delay(false, None);
            assert!(delay >= previous, "seed {}: {:?} < {:?}", seed, delay, previous);
            assert!(delay <= Duration::from_millis(30_000));
            previous = delay;
        }

        assert_eq!(previous, Duration::from_millis(30_000));
    }
}

#[test]
fn test_backoff_success_resets_to_minimum() {
    let mut backoff = seeded(50, 5000, 200, 3);

    backoff.next_delay(false, None);
    backoff.next_delay(false, None);
    assert!(backoff.current_interval() > Duration::from_millis(50));

    assert_eq!(backoff.next_delay(true, None), Duration::from_millis(50));

    // Growth restarts from the first exponent
    let after_reset = backoff.next_delay(false, None);
    assert!(after_reset <= Duration::from_millis(50 + 240));
}

#[test]
fn test_backoff_with_same_seed_is_deterministic() {
    let mut first = seeded(10, 10_000, 50, 99);
    let mut second = seeded(10, 10_000, 50, 99);

    for _ in 0..8 {
        assert_eq!(first.next_delay(false, None), second.next_delay(false, None));
    }
}
