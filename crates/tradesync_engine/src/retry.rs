//! Retry policy with exponential backoff.

use crate::classifier::{classify, Classify, ErrorClass};
use crate::config::RetryConfig;
use crate::context::ErrorContext;
use crate::error::RetryError;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Computes the delay after `attempt_count` failed attempts.
///
/// `base_delay * backoff_factor^attempt_count`, capped at `max_delay`, plus
/// jitter in `[0, delay/2)` when enabled.
pub fn next_delay(attempt_count: u32, config: &RetryConfig) -> Duration {
    let exponent = attempt_count.min(i32::MAX as u32) as i32;
    let raw = config.base_delay.as_secs_f64() * config.backoff_factor.powi(exponent);
    let max = config.max_delay.as_secs_f64();
    let secs = if raw.is_finite() { raw.min(max) } else { max };
    let delay = Duration::try_from_secs_f64(secs).unwrap_or(config.max_delay);

    if config.jitter && !delay.is_zero() {
        let jitter = rand::thread_rng().gen_range(0.0..delay.as_secs_f64() / 2.0);
        delay.saturating_add(Duration::try_from_secs_f64(jitter).unwrap_or(Duration::ZERO))
    } else {
        delay
    }
}

/// Decides whether a failure after `attempt_count` previous failures
/// deserves another attempt.
pub fn should_retry(attempt_count: u32, config: &RetryConfig, class: ErrorClass) -> bool {
    class == ErrorClass::Transient && attempt_count < config.max_retries
}

/// Runs `operation`, retrying transient failures with backoff.
///
/// Works with any error type that can be [classified](Classify). The
/// operation is invoked at most `config.max_retries + 1` times. A permanent
/// failure is returned immediately. The final error is wrapped in a
/// [`RetryError`] together with `context`.
///
/// # Example
///
/// ```rust
/// use tradesync_engine::{retry_operation, ErrorContext, RemoteError, RetryConfig};
///
/// # tokio_test_block(async {
/// let result: Result<u32, _> = retry_operation(
///     || async { Err::<u32, _>(RemoteError::permanent("invalid symbol")) },
///     &RetryConfig::default(),
///     ErrorContext::new("save_trade"),
/// )
/// .await;
/// assert!(result.is_err());
/// # });
/// # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
pub async fn retry_operation<T, E, F, Fut>(
    mut operation: F,
    config: &RetryConfig,
    context: ErrorContext,
) -> Result<T, RetryError<E>>
where
    E: Classify + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt_count = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt_count > 0 {
                    debug!(
                        operation = %context.operation_name,
                        retries = attempt_count,
                        "succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(error) => {
                let class = classify(&error);
                if !should_retry(attempt_count, config, class) {
                    return Err(RetryError {
                        context: Box::new(context),
                        attempts: attempt_count + 1,
                        source: error,
                    });
                }

                let delay = next_delay(attempt_count, config);
                warn!(
                    operation = %context.operation_name,
                    attempt = attempt_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt_count += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RemoteError, SyncError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn fixed(max_retries: u32) -> RetryConfig {
        RetryConfig::new(max_retries)
            .with_base_delay(Duration::from_millis(100))
            .with_backoff_factor(2.0)
            .with_jitter(false)
    }

    #[test]
    fn delay_grows_exponentially() {
        let config = fixed(3);
        assert_eq!(next_delay(0, &config), Duration::from_millis(100));
        assert_eq!(next_delay(1, &config), Duration::from_millis(200));
        assert_eq!(next_delay(2, &config), Duration::from_millis(400));
    }

    #[test]
    fn delay_respects_max() {
        let config = fixed(10)
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_factor(10.0);
        assert_eq!(next_delay(5, &config), Duration::from_secs(5));
        assert_eq!(next_delay(u32::MAX, &config), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_below_half_delay() {
        let config = fixed(3).with_jitter(true);
        for _ in 0..200 {
            let delay = next_delay(1, &config);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay < Duration::from_millis(300));
        }
    }

    #[test]
    fn no_retry_has_zero_delay() {
        assert_eq!(next_delay(0, &RetryConfig::no_retry()), Duration::ZERO);
    }

    #[test]
    fn should_retry_rules() {
        let config = fixed(3);
        assert!(should_retry(0, &config, ErrorClass::Transient));
        assert!(should_retry(2, &config, ErrorClass::Transient));
        assert!(!should_retry(3, &config, ErrorClass::Transient));
        assert!(!should_retry(0, &config, ErrorClass::Permanent));
        assert!(!should_retry(0, &RetryConfig::no_retry(), ErrorClass::Transient));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = retry_operation(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(RemoteError::Timeout)
                    } else {
                        Ok(n)
                    }
                }
            },
            &fixed(3),
            ErrorContext::new("save_trade"),
        )
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(310), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_context_and_attempts() {
        let calls = AtomicU32::new(0);

        let err = retry_operation(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RemoteError::other("connection reset")) }
            },
            &fixed(3),
            ErrorContext::new("sync_trade").with_user_id("u1"),
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err.attempts, 4);
        assert_eq!(err.context.operation_name, "sync_trade");
        assert_eq!(err.context.user_id.as_deref(), Some("u1"));
        assert_eq!(err.source, RemoteError::other("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let err = retry_operation(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RemoteError::permanent("quantity must be positive")) }
            },
            &fixed(3),
            ErrorContext::new("save_trade"),
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(err.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_any_classifiable_error() {
        let calls = AtomicU32::new(0);

        let result = retry_operation(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(SyncError::Remote(RemoteError::Timeout))
                    } else {
                        Ok("saved")
                    }
                }
            },
            &fixed(3),
            ErrorContext::new("local_save"),
        )
        .await
        .unwrap();
        assert_eq!(result, "saved");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        calls.store(0, Ordering::SeqCst);
        let err = retry_operation(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(SyncError::UnknownOperation("op-1".into())) }
            },
            &fixed(3),
            ErrorContext::new("local_save"),
        )
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err.source, SyncError::UnknownOperation(_)));
        assert!(err.to_string().starts_with("local_save failed after 1 attempt(s)"));
    }

    #[test]
    fn huge_delays_saturate_instead_of_panicking() {
        let config = RetryConfig::new(3)
            .with_base_delay(Duration::from_secs(u64::MAX / 2))
            .with_max_delay(Duration::MAX)
            .with_jitter(false);
        assert_eq!(next_delay(3, &config), Duration::MAX);
        assert_eq!(next_delay(3, &config.clone().with_jitter(true)), Duration::MAX);

        let config = RetryConfig::new(3)
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(u64::MAX / 4))
            .with_jitter(true);
        assert!(next_delay(u32::MAX, &config) >= config.max_delay);
    }
}
