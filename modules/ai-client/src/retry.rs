use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::AiError;

/// Explicit retry policy for external calls: bounded attempts, capped
/// exponential backoff with jitter, retrying only transient error classes.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given retry attempt (1-based), with uniform jitter
    /// up to the exponential step. A rate-limit hint overrides the curve.
    fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint + Duration::from_millis(rand::rng().random_range(100..500));
        }
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay)
            .max(self.base_delay);
        let ms = rand::rng().random_range(self.base_delay.as_millis() as u64..=exp.as_millis() as u64);
        Duration::from_millis(ms)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is exhausted.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, AiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AiError>>,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let hint = match &err {
                        AiError::RateLimited { retry_after } => *retry_after,
                        _ => None,
                    };
                    let delay = self.delay_for(attempt, hint);
                    warn!(
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast_policy()
            .run("test", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AiError::Timeout)
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = fast_policy()
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AiError::Api {
                    status: 400,
                    body: "bad request".to_string(),
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_attempt_budget() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = fast_policy()
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AiError::InvalidResponse("not json".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
