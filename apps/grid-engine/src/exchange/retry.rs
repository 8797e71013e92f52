//! Retry policies with exponential backoff for exchange calls.
//!
//! | Retryable | Non-Retryable |
//! |-----------|---------------|
//! | Connection errors, timeouts | Order rejected (non post-only) |
//! | Rate limiting | Insufficient balance |
//! | Post-only reject (with reprice) | Unknown order |
//!
//! # Example
//!
//! ```rust,ignore
//! use grid_engine::exchange::{RetryPolicy, BackoffCalculator};
//!
//! let policy = RetryPolicy::default();
//! let mut backoff = BackoffCalculator::new(&policy);
//!
//! let delay1 = backoff.next_backoff(); // ~100ms with jitter
//! let delay2 = backoff.next_backoff(); // ~200ms with jitter
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::port::ExchangeError;

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.2
}

/// Retry policy for exchange calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts including the first (default: 4).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff in milliseconds (default: 100).
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Backoff cap in milliseconds (default: 5000).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Exponential growth factor (default: 2.0).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Jitter factor (default: 0.2 = ±20%).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without waiting.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }
}

/// Calculator for exponential backoff with jitter.
#[derive(Debug)]
pub struct BackoffCalculator {
    current_attempt: u32,
    max_retries: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl BackoffCalculator {
    /// Create a calculator from a policy. Yields `max_attempts - 1` delays.
    #[must_use]
    pub const fn new(policy: &RetryPolicy) -> Self {
        Self {
            current_attempt: 0,
            max_retries: policy.max_attempts.saturating_sub(1),
            initial_backoff_ms: policy.initial_backoff_ms,
            max_backoff_ms: policy.max_backoff_ms,
            backoff_multiplier: policy.backoff_multiplier,
            jitter_factor: policy.jitter_factor,
        }
    }

    /// Next delay, or `None` once retries are exhausted.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_retries {
            return None;
        }
        let base = self.base_backoff_ms();
        let jittered = self.apply_jitter(base).min(self.max_backoff_ms);
        self.current_attempt += 1;
        Some(Duration::from_millis(jittered))
    }

    fn base_backoff_ms(&self) -> u64 {
        let multiplier = self.backoff_multiplier.powi(self.current_attempt as i32);
        let backoff = (self.initial_backoff_ms as f64 * multiplier) as u64;
        backoff.min(self.max_backoff_ms)
    }

    fn apply_jitter(&self, backoff_ms: u64) -> u64 {
        if self.jitter_factor <= 0.0 || backoff_ms == 0 {
            return backoff_ms;
        }
        let mut rng = rand::rng();
        let range = backoff_ms as f64 * self.jitter_factor;
        let min = (backoff_ms as f64 - range).max(0.0);
        let max = backoff_ms as f64 + range;
        rng.random_range(min..=max) as u64
    }

    /// Retries handed out so far.
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}

/// Error categories for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transient failure.
    Retryable,
    /// Permanent failure.
    NonRetryable,
    /// Rate limited; back off and retry.
    RateLimited,
    /// Post-only order crossed the book; retry, then reprice.
    PostOnlyReject,
}

impl ErrorCategory {
    /// Whether a plain retry of the same request can succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Retryable | Self::RateLimited)
    }
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
///
/// Only transient errors are retried; everything else returns at once.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, ExchangeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
{
    let mut backoff = BackoffCalculator::new(policy);
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.category().is_transient() => match backoff.next_backoff() {
                Some(delay) => {
                    debug!(operation, attempt = backoff.current_attempt(), ?delay, error = %err, "retrying exchange call");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(operation, error = %err, "exchange call exhausted retries");
                    return Err(err);
                }
            },
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_backoff_ms, 100);
        assert!((policy.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_exponential_backoff_sequence() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..Default::default()
        };
        let mut backoff = BackoffCalculator::new(&policy);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(400)));
        assert!(backoff.next_backoff().is_none());
    }

    #[test]
    fn test_max_backoff_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 5_000,
            backoff_multiplier: 10.0,
            jitter_factor: 0.0,
        };
        let mut backoff = BackoffCalculator::new(&policy);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_jitter_range() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let mut backoff = BackoffCalculator::new(&policy);
            let d = backoff.next_backoff().unwrap();
            assert!(d >= Duration::from_millis(80) && d <= Duration::from_millis(120));
        }
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            ExchangeError::Connection {
                message: "reset".into()
            }
            .category(),
            ErrorCategory::Retryable
        );
        assert_eq!(ExchangeError::RateLimited.category(), ErrorCategory::RateLimited);
        assert_eq!(
            ExchangeError::PostOnlyRejected {
                reason: "would cross".into()
            }
            .category(),
            ErrorCategory::PostOnlyReject
        );
        assert!(!ExchangeError::InsufficientFunds.category().is_transient());
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::immediate(3), "fetch", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ExchangeError::Connection {
                    message: "timeout".into(),
                })
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_and_skips_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::immediate(3), "fetch", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ExchangeError::RateLimited)
        })
        .await;
        assert_eq!(result, Err(ExchangeError::RateLimited));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        calls.store(0, Ordering::SeqCst);
        let result: Result<(), _> = with_retry(&RetryPolicy::immediate(3), "place", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ExchangeError::InsufficientFunds)
        })
        .await;
        assert_eq!(result, Err(ExchangeError::InsufficientFunds));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
