//! # Backoff policy for worker respawns.
//!
//! The delay for crash `n` (0-indexed, consecutive crashes since the last
//! worker reached `listening`) is `first × factor^n`, clamped to `max`, then
//! jittered. The base is derived from `n` alone, so jitter output never feeds
//! back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use clustervisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(1),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(1), Duration::from_millis(200));
//! assert_eq!(backoff.next(10), Duration::from_secs(1));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Respawn backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the replacement for the first crash.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl BackoffPolicy {
    /// Refork immediately, every time.
    pub fn none() -> Self {
        Self {
            first: Duration::ZERO,
            max: Duration::ZERO,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the delay before the replacement for crash number `crash` (0-indexed).
    pub fn next(&self, crash: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = crash.min(i32::MAX as u32) as i32;
        let unclamped_secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base =
            if !unclamped_secs.is_finite() || unclamped_secs < 0.0 || unclamped_secs > max_secs {
                self.max
            } else {
                Duration::from_secs_f64(unclamped_secs)
            };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn grows_exponentially_until_capped() {
        let policy = plain(100, 1_000, 2.0);
        assert_eq!(policy.next(0), Duration::from_millis(100));
        assert_eq!(policy.next(3), Duration::from_millis(800));
        assert_eq!(policy.next(4), Duration::from_secs(1));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn first_larger_than_max_is_capped() {
        assert_eq!(plain(10_000, 5_000, 2.0).next(0), Duration::from_secs(5));
    }

    #[test]
    fn none_never_waits() {
        let policy = BackoffPolicy::none();
        for crash in [0, 1, 7, 1_000] {
            assert_eq!(policy.next(crash), Duration::ZERO);
        }
    }

    #[test]
    fn default_jitter_stays_within_half_and_full_base() {
        let policy = BackoffPolicy::default();
        for crash in 0..12 {
            let base = plain(100, 10_000, 2.0).next(crash);
            let delay = policy.next(crash);
            assert!(delay >= base / 2, "crash {crash}: {delay:?} < half of {base:?}");
            assert!(delay <= base, "crash {crash}: {delay:?} > {base:?}");
        }
    }
}
