//! Re-delivery delay policies.
//!
//! A rate limiter maps a key's current failure count to the delay before the
//! key is handed to a worker again. Limiters are pure; the failure counts
//! themselves live inside the work queue's state.

use std::fmt;
use std::time::Duration;

/// Base delay of the default controller limiter.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Cap of the default controller limiter.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Computes the re-delivery delay for a key that has already been requeued
/// `requeues` times.
pub trait RateLimiter: Send + Sync + fmt::Debug {
    fn when(&self, requeues: u32) -> Duration;
}

/// `base * 2^requeues`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl RateLimiter for ExponentialBackoff {
    fn when(&self, requeues: u32) -> Duration {
        1u32.checked_shl(requeues)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Same delay for every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantDelay(pub Duration);

impl RateLimiter for ConstantDelay {
    fn when(&self, _requeues: u32) -> Duration {
        self.0
    }
}

/// The longest delay among several limiters.
#[derive(Debug, Default)]
pub struct MaxOf {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl MaxOf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, limiter: impl RateLimiter + 'static) -> Self {
        self.limiters.push(Box::new(limiter));
        self
    }
}

impl RateLimiter for MaxOf {
    fn when(&self, requeues: u32) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(requeues))
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

/// Limiter used when nothing else is configured: 5ms doubling up to 1000s.
pub fn default_controller_rate_limiter() -> ExponentialBackoff {
    ExponentialBackoff::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles_from_base() {
        let limiter = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(60));
        assert_eq!(limiter.when(0), Duration::from_millis(5));
        assert_eq!(limiter.when(1), Duration::from_millis(10));
        assert_eq!(limiter.when(2), Duration::from_millis(20));
        assert_eq!(limiter.when(4), Duration::from_millis(80));
    }

    #[test]
    fn exponential_is_monotonic_and_capped() {
        let limiter = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1));
        let delays: Vec<_> = (0..40).map(|n| limiter.when(n)).collect();
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0], "{:?} then {:?}", pair[0], pair[1]);
        }
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(1));
        // Shift overflow falls back to the cap instead of wrapping.
        assert_eq!(limiter.when(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn max_of_picks_longest() {
        let limiter = MaxOf::new()
            .with(ExponentialBackoff::new(
                Duration::from_millis(1),
                Duration::from_secs(10),
            ))
            .with(ConstantDelay(Duration::from_millis(50)));

        assert_eq!(limiter.when(0), Duration::from_millis(50));
        assert_eq!(limiter.when(10), Duration::from_millis(1024));
        assert_eq!(MaxOf::new().when(3), Duration::ZERO);
    }

    #[test]
    fn default_limiter_matches_controller_defaults() {
        let limiter = default_controller_rate_limiter();
        assert_eq!(limiter.when(0), DEFAULT_BASE_DELAY);
        assert_eq!(limiter.when(64), DEFAULT_MAX_DELAY);
    }
}
