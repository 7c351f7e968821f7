use std::future::Future;
use std::time::Duration;

use super::error::{ProviderError, RetryError};

/// Bounded exponential backoff around one provider.
///
/// The delay after failed attempt `n` (1-based) is `base_delay * 2^(n-1)`, plus up to 25%
/// jitter when enabled. `Unauthorized` and `InvalidRequest` are returned immediately.
/// `Unknown` gets one retry; a second `Unknown` is fatal.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter: true,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Same timing, different budget. Used for request-scoped attempt limits.
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self.clone()
        }
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exp)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.backoff_delay(attempt);
        if !self.jitter {
            return base;
        }
        // 25% jitter to avoid thundering herd
        let jitter_ms = fastrand::u64(0..=base.as_millis() as u64 / 4);
        base + Duration::from_millis(jitter_ms)
    }

    /// Run `op` until it succeeds or the budget is spent. `op` receives the 1-based attempt
    /// number. Waits use `tokio::time::sleep`, so only the calling task is suspended.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut unknown_seen = false;
        let mut attempt = 1;

        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(RetryError::Fatal {
                    attempts: attempt,
                    error: err,
                });
            }

            if matches!(err, ProviderError::Unknown(_)) {
                if unknown_seen {
                    return Err(RetryError::Fatal {
                        attempts: attempt,
                        error: err,
                    });
                }
                unknown_seen = true;
            }

            if attempt >= self.max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.delay_for(attempt);
            tracing::warn!(
                attempt = attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "LLM call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
