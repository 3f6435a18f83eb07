//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Exponential backoff with a cap and a small random jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Growth factor applied per failed attempt.
    pub multiplier: f64,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Fraction of the delay added as uniform random jitter (0.0 disables).
    /// Spreads retries out when many jobs fail at once against the same
    /// downstream dependency.
    pub jitter: f64,
}

impl RetryPolicy {
    pub const DEFAULT_JITTER: f64 = 0.1;

    /// Calculate the delay before the next retry.
    ///
    /// `attempts` is the number of attempts already made (>= 1 when a retry
    /// is being scheduled). delay = base * multiplier^(attempts - 1),
    /// clamped to `max_delay`, plus jitter.
    ///
    /// With base=2s, multiplier=2.0: 2s, 4s, 8s, 16s, ...
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exp = attempts.saturating_sub(1) as i32;
        let raw = base_secs * self.multiplier.powi(exp);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jittered = capped * (1.0 + self.jitter * rand::random::<f64>());
        Duration::from_secs_f64(jittered)
    }

    /// Same policy with jitter disabled. Used by tests that assert exact
    /// delays.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: Self::DEFAULT_JITTER,
        }
    }
}
