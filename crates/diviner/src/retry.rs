//! Bounded retry with backoff.
//!
//! A [`RetryPolicy`] is a plain value: the resolver receives one and applies
//! it around each oracle request. Delays are slept before every retry, never
//! after the final attempt.

use std::time::Duration;

use serde::Deserialize;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { millis: u64 },
    /// `millis * retry` before the n-th retry.
    Linear { millis: u64 },
    /// `base_millis * 2^(retry - 1)`, capped at `max_millis`.
    Exponential { base_millis: u64, max_millis: u64 },
}

impl Backoff {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let millis = match *self {
            Backoff::Fixed { millis } => millis,
            Backoff::Linear { millis } => millis.saturating_mul(u64::from(retry)),
            Backoff::Exponential {
                base_millis,
                max_millis,
            } => {
                let shift = retry.saturating_sub(1).min(63);
                base_millis
                    .checked_mul(1u64 << shift)
                    .unwrap_or(u64::MAX)
                    .min(max_millis)
            }
        };
        Duration::from_millis(millis)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed { millis: 100 }
    }
}

/// Maximum attempt count plus backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Treated as at least 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// All attempts failed; carries the last error.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last: E,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// `op` receives the 1-based attempt number.
    pub fn run<T, E, F>(&self, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: std::fmt::Display,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= max => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    let delay = self.backoff.delay(attempt);
                    tracing::debug!(attempt, ?delay, "attempt failed, retrying: {}", err);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
