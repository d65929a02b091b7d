use std::time::Duration;

use tracing::debug;

use crate::cancel::{check_cancelled, CancelToken};
use crate::config::RetryConfig;
use crate::error::AppError;

/// Bounded retry with exponential backoff for calls to external capabilities.
///
/// Only errors flagged `retryable` are retried. Retrying stops at `max_attempts`, or earlier
/// when the next delay would push the accumulated wait past `max_total_wait`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_total_wait: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            max_total_wait: Duration::from_millis(cfg.max_total_wait_ms),
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_total_wait: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(20);
        let factor = 1u32 << exp;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn run<T, F>(&self, op: &str, cancel: Option<&CancelToken>, f: F) -> Result<T, AppError>
    where
        F: FnMut(u32) -> Result<T, AppError>,
    {
        self.run_with_sleep(op, cancel, f, std::thread::sleep)
    }

    /// Same as [`RetryPolicy::run`] with an injectable sleeper, so schedules can be tested
    /// without waiting.
    pub fn run_with_sleep<T, F, S>(
        &self,
        op: &str,
        cancel: Option<&CancelToken>,
        mut f: F,
        mut sleep: S,
    ) -> Result<T, AppError>
    where
        F: FnMut(u32) -> Result<T, AppError>,
        S: FnMut(Duration),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut waited = Duration::ZERO;
        let mut attempt: u32 = 1;
        loop {
            check_cancelled(cancel, op)?;
            let err = match f(attempt) {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            if !err.retryable || attempt >= max_attempts {
                return Err(err);
            }
            let delay = self.delay_for(attempt);
            if waited + delay > self.max_total_wait {
                debug!(op, attempt, waited_ms = waited.as_millis() as u64, "retry wait budget exhausted");
                return Err(err);
            }
            debug!(op, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
            sleep(delay);
            waited += delay;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
