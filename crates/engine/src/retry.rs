use std::future::Future;
use std::hash::{Hash, Hasher};

use deepresearch_common::config::RetryConfig;

/// How an error should be treated by the retry engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient — network timeouts, HTTP 5xx, transient DNS.
    Retryable,
    /// HTTP 429. `retry_after` (seconds) is a floor on the next wait.
    RateLimited { retry_after: Option<u64> },
    /// 4xx (except 408/429), auth failures, schema errors, cancellation.
    Fatal,
}

/// Implemented by error types flowing through `retry_with_backoff`.
pub trait Retryable {
    fn retry_class(&self) -> RetryClass;
}

/// Run `op` with exponential backoff and jitter until it succeeds, fails
/// fatally, or attempts are exhausted. Always terminates: under perpetual
/// failure the last error is returned after `max_attempts`.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &RetryConfig,
    op_name: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    let mut backoff_ms = config.initial_backoff_ms;

    loop {
        attempt += 1;
        let result = op().await;

        let error = match result {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        match error.retry_class() {
            RetryClass::Fatal => {
                metrics::counter!("retry.fatal", "op" => op_name.to_string()).increment(1);
                return Err(error);
            }
            RetryClass::RateLimited { retry_after } => {
                if attempt >= config.max_attempts {
                    metrics::counter!("retry.exhausted", "op" => op_name.to_string()).increment(1);
                    return Err(error);
                }
                // Retry-After is a floor, never a shortening.
                let wait = retry_after
                    .map(|s| s.saturating_mul(1_000))
                    .unwrap_or(0)
                    .max(backoff_ms);
                tracing::warn!(op = op_name, attempt, wait_ms = wait, "Rate limited, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
            }
            RetryClass::Retryable => {
                if attempt >= config.max_attempts {
                    metrics::counter!("retry.exhausted", "op" => op_name.to_string()).increment(1);
                    return Err(error);
                }
                let wait = if config.jitter {
                    apply_jitter(backoff_ms, attempt)
                } else {
                    backoff_ms
                };
                tracing::warn!(
                    op = op_name,
                    attempt,
                    wait_ms = wait,
                    error = %error,
                    "Transient error, retrying"
                );
                tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
            }
        }

        backoff_ms = (backoff_ms as f64 * config.backoff_multiplier) as u64;
        backoff_ms = backoff_ms.min(config.max_backoff_ms);
    }
}

/// Spread `backoff_ms` by ±30% using hash-based entropy.
fn apply_jitter(backoff_ms: u64, attempt: u32) -> u64 {
    let spread = backoff_ms * 3 / 10;
    if spread == 0 {
        return backoff_ms;
    }

    let mut hasher = std::hash::DefaultHasher::new();
    attempt.hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        .hash(&mut hasher);

    backoff_ms - spread + hasher.finish() % (2 * spread + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("fatal")]
        Fatal,
        #[error("rate limited")]
        RateLimited(Option<u64>),
    }

    impl Retryable for TestError {
        fn retry_class(&self) -> RetryClass {
            match self {
                Self::Transient => RetryClass::Retryable,
                Self::Fatal => RetryClass::Fatal,
                Self::RateLimited(after) => RetryClass::RateLimited {
                    retry_after: *after,
                },
            }
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_perpetual_failure_terminates_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = retry_with_backoff(&fast_config(5), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Transient) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_fatal_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = retry_with_backoff(&fast_config(5), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Fatal) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = retry_with_backoff(&fast_config(5), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_after_is_a_floor() {
        // retry_after of 0s must still retry (floor of backoff applies).
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = retry_with_backoff(&fast_config(2), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::RateLimited(Some(0))) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_jitter_stays_within_band() {
        for attempt in 0..100 {
            let jittered = apply_jitter(1_000, attempt);
            assert!((700..=1_300).contains(&jittered));
        }
    }
}
