// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Exponential backoff with jitter for calls to external services.
//!
//! The delay before retry `n` (1-based) is
//! `min(base * multiplier^(n-1), max) * (1 ± jitter)`. A server-supplied
//! `Retry-After` replaces the computed delay when it is longer.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::domain::platform::PlatformError;
use crate::domain::stage::StageError;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for PlatformError {
    fn is_retryable(&self) -> bool {
        PlatformError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        PlatformError::retry_after(self)
    }
}

impl Retryable for StageError {
    fn is_retryable(&self) -> bool {
        matches!(self, StageError::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of the delay randomly added or removed (0.0 disables).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(300_000),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Backoff before retry number `retry` (1-based), before jitter.
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let delay = self.base_delay_for(retry);
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = 1.0 + rand::rng().random_range(-self.jitter..=self.jitter);
        Duration::from_millis((delay.as_millis() as f64 * factor).max(0.0) as u64)
    }
}

/// The last error seen and how many attempts were made.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryFailure<E>>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_retryable() || attempt >= max_attempts => {
                return Err(RetryFailure { error, attempts: attempt });
            }
            Err(error) => {
                let computed = policy.calculate_delay(attempt);
                let delay = match error.retry_after() {
                    Some(requested) if requested > computed => requested,
                    _ => computed,
                };
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        }
        .without_jitter();
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(2000));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(4000));
        assert_eq!(policy.calculate_delay(4), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.calculate_delay(2).as_millis();
            assert!((1600..=2400).contains(&delay), "delay {delay} out of band");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10)).without_jitter();
        let result = retry_with_backoff(&policy, |_| async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PlatformError::Transient("reset".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let result: Result<(), _> =
            retry_with_backoff(&policy, |_| async { Err(PlatformError::Unauthorized("revoked".into())) }).await;
        assert_eq!(result.unwrap_err().attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_overrides_shorter_backoff() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10)).without_jitter();
        let started = tokio::time::Instant::now();
        let result: Result<(), _> = retry_with_backoff(&policy, |_| async {
            Err(PlatformError::RateLimited {
                retry_after: Some(Duration::from_secs(30)),
            })
        })
        .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }
}
