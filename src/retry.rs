//! Exponential backoff with jitter for transient backend failures.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::error::{ArchiveError, Result};

/// Retry tuning.
///
/// `delay_n = min(initial_delay * multiplier^n, max_delay)`, then perturbed by
/// up to `± jitter` of itself. A fixed `seed` makes the schedule reproducible.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction in `[0, 1]`.
    pub jitter: f64,
    pub seed: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.1,
            seed: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps. Useful in tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
            ..Self::default()
        }
    }

    /// Un-jittered delay before retry `attempt` (0-indexed).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        if capped.is_finite() {
            Duration::from_secs_f64(capped.max(0.0))
        } else {
            self.max_delay
        }
    }

    /// Every sleep the policy would perform, in order.
    #[must_use]
    pub fn schedule(&self) -> Vec<Duration> {
        let mut rng = self.rng();
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.jittered(attempt, &mut rng))
            .collect()
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }

    fn jittered(&self, attempt: u32, rng: &mut StdRng) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        if self.jitter <= 0.0 || base == 0.0 {
            return Duration::from_secs_f64(base);
        }
        let offset: f64 = rng.random_range(-1.0..=1.0);
        Duration::from_secs_f64((base * (1.0 + self.jitter * offset)).max(0.0))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ArchiveError::Config("retry.max_attempts must be >= 1".into()));
        }
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(ArchiveError::Config("retry.multiplier must be >= 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ArchiveError::Config("retry.jitter must be within [0, 1]".into()));
        }
        if self.max_delay < self.initial_delay {
            return Err(ArchiveError::Config(
                "retry.max_delay_ms must be >= retry.initial_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Run `operation`, retrying only errors for which [`ArchiveError::is_transient`] holds.
pub fn with_retry<T, F>(policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    with_retry_if(policy, operation, ArchiveError::is_transient)
}

/// Run `operation`, retrying errors accepted by `should_retry`.
///
/// After the last attempt the final error is returned unchanged.
pub fn with_retry_if<T, E, F, C>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: C,
) -> std::result::Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> std::result::Result<T, E>,
    C: Fn(&E) -> bool,
{
    let attempts = policy.max_attempts.max(1);
    let mut rng = policy.rng();
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= attempts || !should_retry(&err) {
                    return Err(err);
                }
                let delay = policy.jittered(attempt - 1, &mut rng);
                warn!(
                    attempt,
                    max_attempts = attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "transient failure, retrying"
                );
                std::thread::sleep(delay);
            }
        }
    }
}
