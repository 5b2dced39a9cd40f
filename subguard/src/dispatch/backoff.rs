//! Exponential backoff with symmetric jitter.

use std::fmt::Debug;
use std::time::Duration;

/// Source of uniformly distributed values in `[0, 1)`.
pub trait JitterSource: Send + Sync + Debug {
    fn unit(&self) -> f64;
}

/// Jitter drawn from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn unit(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// A constant jitter value, for deterministic delays.
///
/// `0.0` yields the shortest delay, `0.5` the unjittered one.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl FixedJitter {
    /// No offset from the exponential delay.
    pub const fn none() -> Self {
        Self(0.5)
    }
}

impl JitterSource for FixedJitter {
    fn unit(&self) -> f64 {
        self.0.clamp(0.0, 1.0)
    }
}

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Fraction of the delay added or subtracted at random, in `[0, 1]`.
    pub jitter_ratio: f64,
}

impl BackoffPolicy {
    /// Un-jittered delay for the 1-based `attempt`: `min(cap, base * 2^(attempt - 1))`.
    pub fn exponential(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base.as_secs_f64() * 2f64.powi(exponent);
        let capped = secs.min(self.cap.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.cap)
    }

    /// Delay before retrying after the 1-based `attempt` failed.
    ///
    /// Uniform in `[exp - j, exp + j]` with `j = exp * jitter_ratio`, never negative.
    pub fn delay(&self, attempt: u32, jitter: &dyn JitterSource) -> Duration {
        let exp = self.exponential(attempt).as_secs_f64();
        let spread = exp * self.jitter_ratio.clamp(0.0, 1.0);
        let offset = (jitter.unit() * 2.0 - 1.0) * spread;
        Duration::try_from_secs_f64((exp + offset).max(0.0)).unwrap_or(Duration::ZERO)
    }
}
