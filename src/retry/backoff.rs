//! # Fibonacci Backoff
//!
//! Provides a Fibonacci-based backoff for retrying policy updates and
//! environment lookups. The delay grows more slowly than exponential backoff,
//! which suits eventually-consistent policy stores that usually settle within
//! a second or two.
//!
//! Sequence for the default 250ms base: 250ms, 250ms, 500ms, 750ms, 1.25s, ...
//!
//! ## Usage
//!
//! ```rust
//! use berglas::retry::FibonacciBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = FibonacciBackoff::new(Duration::from_millis(250), Duration::from_secs(30));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(250));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(250));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(500));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(750));
//! ```

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Previous delay
    prev: Duration,
    /// Current delay
    current: Duration,
    /// Upper bound for any single delay
    max: Duration,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff starting at `base` and capped at `max`
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            prev: Duration::ZERO,
            current: base.min(max),
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;

        let next = self.prev.saturating_add(self.current);
        self.prev = self.current;
        self.current = next.min(self.max);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(ms(250), Duration::from_secs(30));

        assert_eq!(backoff.next_backoff(), ms(250));
        assert_eq!(backoff.next_backoff(), ms(250));
        assert_eq!(backoff.next_backoff(), ms(500));
        assert_eq!(backoff.next_backoff(), ms(750));
        assert_eq!(backoff.next_backoff(), ms(1250));
        assert_eq!(backoff.next_backoff(), ms(2000));
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(ms(250), ms(600));

        assert_eq!(backoff.next_backoff(), ms(250));
        assert_eq!(backoff.next_backoff(), ms(250));
        assert_eq!(backoff.next_backoff(), ms(500));
        // 750ms capped at 600ms
        assert_eq!(backoff.next_backoff(), ms(600));
        // Should stay at max
        assert_eq!(backoff.next_backoff(), ms(600));
    }

    #[test]
    fn test_base_above_max_is_clamped() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
    }
}
