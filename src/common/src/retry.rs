//! Bounded retry with exponential backoff.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry policy for transient I/O failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be positive");
        }
        if self.backoff_multiplier < 1.0 {
            anyhow::bail!(
                "backoff_multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            );
        }
        Ok(())
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_nanos =
            self.initial_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);
        let max_nanos = self.max_delay.as_nanos() as f64;
        Duration::from_nanos(delay_nanos.min(max_nanos).round() as u64)
    }
}

/// Outcome of a retried operation
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    /// Number of attempts made, at least 1
    pub attempts: u32,
}

/// Run `op` until it succeeds, `is_transient` rejects the error, or the
/// attempt budget is exhausted.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Retried<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempt, "Operation succeeded after retry");
                }
                return Retried {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if attempt < max_attempts && is_transient(&e) => {
                let delay = config.delay_for(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts,
                    error = %e,
                    delay = ?delay,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    operation,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Operation failed, giving up"
                );
                return Retried {
                    result: Err(e),
                    attempts: attempt,
                };
            }
        }
    }
}
