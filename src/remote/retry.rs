//! Automatic retry of transient remote failures.
//!
//! Only operations marked [`Idempotency::Idempotent`] are retried. Creates
//! and deletes are attempted once: replaying them after a lost response
//! could duplicate a user, a task or a comment.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    Idempotent,
    NonIdempotent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// HTTP statuses treated as transient.
    pub statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(120),
            statuses: vec![500, 502, 503, 504],
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_backoff: Duration::from_millis(cfg.backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
            statuses: cfg.statuses.clone(),
        }
    }
}

impl RetryPolicy {
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    pub fn max_attempts(&self, idempotency: Idempotency) -> u32 {
        match idempotency {
            Idempotency::Idempotent => self.max_retries.saturating_add(1),
            Idempotency::NonIdempotent => 1,
        }
    }

    /// Run `attempt` until it succeeds, fails non-transiently, or the retry
    /// budget for `idempotency` runs out.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        idempotency: Idempotency,
        mut attempt: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let max_attempts = self.max_attempts(idempotency);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_transient(&self.statuses) {
                return Err(err);
            }
            if attempts >= max_attempts {
                if attempts == 1 {
                    return Err(err);
                }
                return Err(ApiError::RetryExhausted {
                    operation: operation.into(),
                    attempts,
                    last_error: Box::new(err),
                });
            }
            let delay = self.backoff(attempts);
            tracing::warn!(
                operation,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
