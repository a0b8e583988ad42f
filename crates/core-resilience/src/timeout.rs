//! Deadlines for suspension points
//!
//! Any await in the toolkit (token wait, breaker-wrapped call, channel put or
//! get) can be bounded from the outside. On expiry the inner future is
//! dropped, so its cleanup runs, and [`ResilienceError::Timeout`] is
//! returned rather than a generic failure.

use super::error::ResilienceError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bound a fallible operation by `duration`
///
/// # Example
/// ```
/// use conflux_core_resilience::{timeout::with_timeout, ResilienceError};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let result = with_timeout(Duration::from_millis(10), async {
///     tokio::time::sleep(Duration::from_secs(1)).await;
///     Ok::<_, ResilienceError>(())
/// })
/// .await;
/// assert_eq!(result, Err(ResilienceError::Timeout(Duration::from_millis(10))));
/// # }
/// ```
pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> Result<T, ResilienceError>
where
    F: Future<Output = Result<T, ResilienceError>>,
{
    with_deadline(duration, fut).await?
}

/// Bound an infallible wait by `duration`
///
/// Useful for `RateLimiter::acquire` or channel operations.
pub async fn with_deadline<F, T>(duration: Duration, fut: F) -> Result<T, ResilienceError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, fut).await.map_err(|_| {
        debug!(timeout_ms = duration.as_millis() as u64, "deadline exceeded");
        ResilienceError::Timeout(duration)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::RateLimiter;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_distinct_from_failure() {
        let slow = with_timeout(Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ResilienceError>(())
        })
        .await;
        assert_eq!(slow, Err(ResilienceError::Timeout(Duration::from_millis(100))));

        let failed: Result<(), _> = with_timeout(Duration::from_secs(1), async {
            Err(ResilienceError::Transient("boom".to_string()))
        })
        .await;
        assert_eq!(failed, Err(ResilienceError::Transient("boom".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_on_token_wait() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10)).unwrap();
        limiter.acquire().await;

        let result = with_deadline(Duration::from_millis(50), limiter.acquire()).await;
        assert_eq!(result, Err(ResilienceError::Timeout(Duration::from_millis(50))));

        // The abandoned wait released the bucket
        assert!(limiter.available_tokens().await < 1.0);
    }

    #[tokio::test]
    async fn test_fast_operation_passes() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, ResilienceError>(9) }).await;
        assert_eq!(result, Ok(9));
    }
}
