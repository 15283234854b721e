//! Retry decision for failed provider calls.
//!
//! [`RetryPolicy::decide`] is a pure function of the attempt count and the
//! failure kind (plus jitter). Re-scheduling is driven by the dispatcher,
//! which records a resume time on the job instead of sleeping.

use std::time::Duration;

use rand::Rng;

use crate::error::ErrorKind;

/// Default total attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff base.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound on a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Exponential backoff with jitter.
///
/// `delay = base * 2^attempt ± random(0, base)`, clamped to `[0, max_delay]`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Decide what to do after `attempt` attempts have failed, the last one
    /// with `kind`.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        self.decide_with(attempt, kind, &mut rand::rng())
    }

    /// [`decide`](Self::decide) with a caller-supplied random source.
    pub fn decide_with<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        kind: ErrorKind,
        rng: &mut R,
    ) -> RetryDecision {
        if !kind.is_transient() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.backoff(attempt, rng))
    }

    /// Jittered delay for the given attempt, within `[0, max_delay]`.
    pub fn backoff<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base_delay.as_millis() as i128;
        let cap_ms = self.max_delay.as_millis() as i128;

        // Past 2^62 every realistic base already exceeds the cap.
        let exp_ms = base_ms.saturating_mul(1i128 << attempt.min(62));
        let jitter_ms = rng.random_range(-base_ms..=base_ms);

        let delay_ms = exp_ms.saturating_add(jitter_ms).clamp(0, cap_ms);
        Duration::from_millis(delay_ms as u64)
    }
}
