use std::time::Duration;

use tokio::time::sleep;

use crate::error::RetryableError;

/// Fixed backoff ladder matching the Gemini vision provider's documented
/// rate-limit cadence (15s/30s/60s on a 429, vs. the evaluator client's
/// exponential schedule below).
pub const GEMINI_BACKOFF_SCHEDULE_MS: [u64; 3] = [15_000, 30_000, 60_000];

pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryConfig {
    /// Fixed-schedule variant for providers that document explicit backoff
    /// windows rather than leaving it to exponential guesswork.
    pub fn fixed_schedule(schedule: &[u64]) -> Self {
        Self {
            max_retries: schedule.len() as u32,
            base_delay_ms: schedule.first().copied().unwrap_or(1_000),
            max_delay_ms: schedule.last().copied().unwrap_or(60_000),
        }
    }
}

pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    E: RetryableError,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                attempt += 1;

                let delay_ms = e.retry_after_ms().unwrap_or_else(|| {
                    std::cmp::min(
                        config.base_delay_ms * 2u64.pow(attempt - 1),
                        config.max_delay_ms,
                    )
                });

                tracing::warn!(
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms,
                    "request failed, retrying"
                );

                sleep(Duration::from_millis(delay_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let config = RetryConfig::default();
        let result = with_retry(&config, || async { Ok::<_, LlmError>("success".to_string()) }).await;
        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = with_retry(&config, || {
            let attempts = attempts_clone.clone();
            async move {
                let count = attempts.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(LlmError::RateLimited {
                        retry_after_ms: 10,
                    })
                } else {
                    Ok("success".to_string())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let config = RetryConfig {
            max_retries: 2,
            base_delay_ms: 10,
            max_delay_ms: 100,
        };

        let result: Result<String, LlmError> = with_retry(&config, || async {
            Err(LlmError::RateLimited {
                retry_after_ms: 10,
            })
        })
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let config = RetryConfig::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<String, LlmError> = with_retry(&config, || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::AuthenticationFailed("bad key".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
