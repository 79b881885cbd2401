//! Retry with linear backoff for rate-limited provider calls.
//!
//! Only errors classified as [`ErrorKind::RateLimited`] are retried. Every
//! other failure is returned on first occurrence.

use std::future::Future;

use tracing::{debug, warn};

use super::error::{EngineError, ErrorKind};
use crate::config::RetryConfig;

/// Errors that carry a provider-independent [`ErrorKind`].
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

impl Classify for EngineError {
    fn kind(&self) -> ErrorKind {
        EngineError::kind(self)
    }
}

/// Execute an async operation, retrying rate-limit failures.
///
/// After failed attempt `n` (1-based) the combinator sleeps
/// `n * backoff_unit` before trying again. The last error is returned
/// without sleeping once `max_attempts` is reached.
///
/// # Example
///
/// ```ignore
/// let reply = with_backoff(&retry, "gemini", "generate_content", || async {
///     client.post(&url).body(body.clone()).send().await
/// })
/// .await?;
/// ```
pub async fn with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    provider: &str,
    operation: &str,
    make_attempt: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + std::fmt::Display,
{
    let max_attempts = if config.enabled {
        config.max_attempts.max(1)
    } else {
        1
    };

    let mut attempt = 1;
    loop {
        match make_attempt().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        provider,
                        operation,
                        attempt,
                        "Request succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(error) => {
                let kind = error.kind();
                if kind.is_retryable() && attempt < max_attempts {
                    let delay = config.delay_for_attempt(attempt);
                    warn!(
                        provider,
                        operation,
                        error = %error,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis(),
                        "Rate limited, will retry after delay"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                if kind.is_retryable() {
                    warn!(
                        provider,
                        operation,
                        error = %error,
                        attempts = attempt,
                        "Request failed after all retry attempts"
                    );
                }
                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use super::*;

    #[derive(Debug)]
    struct FakeError(ErrorKind);

    impl std::fmt::Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "fake {}", self.0)
        }
    }

    impl Classify for FakeError {
        fn kind(&self) -> ErrorKind {
            self.0
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            enabled: true,
            max_attempts: 3,
            backoff_unit_ms: 1,
        }
    }

    #[test]
    fn test_default_retry_config() {
        let config = RetryConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_unit_ms, 10_000);
    }

    #[test]
    fn test_delay_for_attempt_is_linear() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let attempts = AtomicU32::new(0);

        let result: Result<i32, FakeError> =
            with_backoff(&fast_config(), "test", "op", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_rate_limit_then_succeeds() {
        let attempts = AtomicU32::new(0);

        let result: Result<&str, FakeError> =
            with_backoff(&fast_config(), "test", "op", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(FakeError(ErrorKind::RateLimited))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), FakeError> =
            with_backoff(&fast_config(), "test", "op", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeError(ErrorKind::RateLimited)) }
            })
            .await;

        assert_eq!(result.unwrap_err().0, ErrorKind::RateLimited);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_rate_limit_errors_are_not_retried() {
        for kind in [
            ErrorKind::Authentication,
            ErrorKind::InvalidRequest,
            ErrorKind::Server,
            ErrorKind::Transport,
            ErrorKind::Decode,
        ] {
            let attempts = AtomicU32::new(0);
            let result: Result<(), FakeError> =
                with_backoff(&fast_config(), "test", "op", || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async move { Err(FakeError(kind)) }
                })
                .await;

            assert_eq!(result.unwrap_err().0, kind);
            assert_eq!(attempts.load(Ordering::SeqCst), 1, "{kind} was retried");
        }
    }

    #[tokio::test]
    async fn test_disabled_makes_single_attempt() {
        let config = RetryConfig {
            enabled: false,
            ..fast_config()
        };
        let attempts = AtomicU32::new(0);

        let result: Result<(), FakeError> = with_backoff(&config, "test", "op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(FakeError(ErrorKind::RateLimited)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_between_attempts_only() {
        let config = RetryConfig {
            enabled: true,
            max_attempts: 3,
            backoff_unit_ms: 20,
        };
        let started = tokio::time::Instant::now();

        let _: Result<(), FakeError> = with_backoff(&config, "test", "op", || async {
            Err(FakeError(ErrorKind::RateLimited))
        })
        .await;

        // 1 * 20ms + 2 * 20ms, nothing after the final attempt
        assert_eq!(started.elapsed(), Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sleep_after_single_attempt() {
        let config = RetryConfig {
            enabled: true,
            max_attempts: 1,
            backoff_unit_ms: 1_000,
        };
        let started = tokio::time::Instant::now();

        let result: Result<(), FakeError> = with_backoff(&config, "test", "op", || async {
            Err(FakeError(ErrorKind::RateLimited))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
