//! Retry delay computation.
//!
//! `delay(n) = unit * 2^n + jitter`, with `jitter` drawn uniformly from
//! `[0, unit * 2^n / 2)`. `n` is the retry count *after* the failure being
//! handled, so the first retry waits about `2 * unit`.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with additive jitter.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use taskpool::pool::backoff::Backoff;
///
/// let backoff = Backoff::new(Duration::from_millis(100));
/// assert_eq!(backoff.base(3), Duration::from_millis(800));
///
/// let delay = backoff.delay(3);
/// assert!(delay >= Duration::from_millis(800));
/// assert!(delay < Duration::from_millis(1200));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    unit: Duration,
}

impl Backoff {
    pub fn new(unit: Duration) -> Self {
        Self { unit }
    }

    /// Delay before jitter: `unit * 2^retries`, saturating.
    pub fn base(&self, retries: u32) -> Duration {
        self.unit.saturating_mul(2u32.saturating_pow(retries))
    }

    /// Full delay using the thread-local RNG.
    pub fn delay(&self, retries: u32) -> Duration {
        self.delay_with(retries, &mut rand::thread_rng())
    }

    /// Full delay drawing jitter from `rng`.
    pub fn delay_with<R: Rng + ?Sized>(&self, retries: u32, rng: &mut R) -> Duration {
        let base = self.base(retries);
        let half = u64::try_from((base / 2).as_nanos()).unwrap_or(u64::MAX);
        if half == 0 {
            return base;
        }
        base.saturating_add(Duration::from_nanos(rng.gen_range(0..half)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn base_doubles_per_retry() {
        let backoff = Backoff::new(Duration::from_millis(10));
        assert_eq!(backoff.base(0), Duration::from_millis(10));
        assert_eq!(backoff.base(1), Duration::from_millis(20));
        assert_eq!(backoff.base(2), Duration::from_millis(40));
        assert_eq!(backoff.base(5), Duration::from_millis(320));
    }

    #[test]
    fn jitter_stays_below_half_base() {
        let backoff = Backoff::new(Duration::from_millis(10));
        let mut rng = StdRng::seed_from_u64(7);
        for retries in 1..8 {
            let base = backoff.base(retries);
            for _ in 0..200 {
                let delay = backoff.delay_with(retries, &mut rng);
                assert!(delay >= base, "{delay:?} < {base:?}");
                assert!(delay < base + base / 2, "{delay:?} too large");
            }
        }
    }

    #[test]
    fn jitter_actually_varies() {
        let backoff = Backoff::new(Duration::from_millis(10));
        let mut rng = StdRng::seed_from_u64(42);
        let first = backoff.delay_with(4, &mut rng);
        let varied = (0..50).any(|_| backoff.delay_with(4, &mut rng) != first);
        assert!(varied);
    }

    #[test]
    fn zero_unit_means_no_delay() {
        let backoff = Backoff::new(Duration::ZERO);
        assert_eq!(backoff.delay(3), Duration::ZERO);
    }

    #[test]
    fn huge_retry_counts_saturate() {
        let backoff = Backoff::new(Duration::from_secs(1));
        assert_eq!(backoff.base(200), Duration::from_secs(1) * u32::MAX);
        // Must not panic on overflow.
        let _ = backoff.delay(200);
    }
}
