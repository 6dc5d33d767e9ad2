//! # Jitter policy for respawn delays.
//!
//! When several workers crash at once (a bad deploy, a shared dependency going
//! away) their replacements would otherwise fork at the same instant.
//!
//! - [`JitterPolicy::None`]: exact delay.
//! - [`JitterPolicy::Full`]: random delay in `[0, delay]`.
//! - [`JitterPolicy::Equal`]: `delay/2 + random[0, delay/2]`.

use rand::Rng;
use std::time::Duration;

/// Randomization applied to a computed backoff delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    #[default]
    None,
    Full,
    Equal,
}

impl JitterPolicy {
    /// Applies jitter to `delay`.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::rng();
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rng.random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                Duration::from_millis(half + rng.random_range(0..=half))
            }
        }
    }
}
