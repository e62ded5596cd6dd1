//! Reconnect backoff policy
//!
//! Delay doubles on every failed attempt, starting at `min` and capped at
//! `max`. A successful subscription resets it.

use std::time::Duration;

/// Smallest delay ever allowed between attempts
pub const MIN_DELAY_FLOOR: Duration = Duration::from_millis(500);

pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    /// `min` is raised to `MIN_DELAY_FLOOR` and `max` to `min` if needed
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(MIN_DELAY_FLOOR);
        let max = max.max(min);
        Self { min, max, attempt: 0 }
    }

    /// Delay before the next attempt; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(31)).unwrap_or(u32::MAX);
        let delay = self.min.saturating_mul(factor).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Failed attempts since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DELAY, DEFAULT_MAX_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_doubles_until_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(30));
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30, 30, 30]);
        assert_eq!(backoff.attempt(), 7);
    }

    #[test]
    fn test_reset_restarts_at_min() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), DEFAULT_MIN_DELAY);
    }

    #[test]
    fn test_floor_prevents_busy_loop() {
        let mut backoff = Backoff::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(backoff.next_delay(), MIN_DELAY_FLOOR);
        assert_eq!(backoff.next_delay(), MIN_DELAY_FLOOR);
    }

    proptest! {
        #[test]
        fn prop_delays_bounded_and_non_decreasing(
            min_ms in 0u64..10_000,
            max_ms in 0u64..120_000,
            attempts in 1usize..80,
        ) {
            let mut backoff = Backoff::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms));
            let floor = Duration::from_millis(min_ms).max(MIN_DELAY_FLOOR);
            let cap = Duration::from_millis(max_ms).max(floor);

            let mut previous = Duration::ZERO;
            for _ in 0..attempts {
                let delay = backoff.next_delay();
                prop_assert!(delay >= floor);
                prop_assert!(delay <= cap);
                prop_assert!(delay >= previous);
                previous = delay;
            }
        }
    }
}
