//! Rate limiting for preventing service overload
//!
//! Provides a token bucket rate limiter. The bucket starts full, refills
//! continuously at `rate_limit / period` tokens per second and never holds
//! more than `rate_limit` tokens. A caller that finds the bucket empty waits
//! exactly as long as it takes for one token to accumulate.

use super::error::ResilienceError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Admission control shared by the rate limiter implementations
///
/// Lets callers (for example a worker pool) throttle work without caring
/// which limiter sits behind it.
#[async_trait]
pub trait Admission: Send + Sync {
    /// Wait until admission is granted
    async fn acquire(&self);

    /// Take admission only if it is available right now
    fn try_acquire(&self) -> Result<(), ResilienceError>;
}

/// Token bucket state
#[derive(Debug)]
struct Bucket {
    /// Available tokens, always within `0.0..=capacity`
    tokens: f64,
    /// Last time tokens were added
    last_refill: Instant,
}

/// Rate limiter using token bucket algorithm
///
/// # Example
/// ```no_run
/// use conflux_core_resilience::{RateLimiter, ResilienceError};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), ResilienceError> {
///     // Allow 100 requests per second
///     let limiter = RateLimiter::new(100, Duration::from_secs(1))?;
///
///     // Execute operation with rate limiting
///     limiter.execute(|| async {
///         // Your operation here
///         Ok::<_, ResilienceError>(42)
///     }).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct RateLimiter {
    /// Maximum requests allowed per period, also the bucket capacity
    rate_limit: u32,
    /// Time period for the rate limit
    period: Duration,
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Arguments
    /// * `rate_limit` - Maximum number of requests allowed in the period
    /// * `period` - Time period for the rate limit
    ///
    /// # Errors
    /// Returns `InvalidConfig` if either argument is zero.
    ///
    /// # Example
    /// ```
    /// use conflux_core_resilience::RateLimiter;
    /// use std::time::Duration;
    ///
    /// // 5 requests per second
    /// let limiter = RateLimiter::new(5, Duration::from_secs(1)).unwrap();
    /// assert_eq!(limiter.rate_limit(), 5);
    /// ```
    pub fn new(rate_limit: u32, period: Duration) -> Result<Self, ResilienceError> {
        if rate_limit == 0 {
            return Err(ResilienceError::InvalidConfig(
                "rate_limit must be > 0".to_string(),
            ));
        }
        if period.is_zero() {
            return Err(ResilienceError::InvalidConfig(
                "time_period must be > 0".to_string(),
            ));
        }

        Ok(Self {
            rate_limit,
            period,
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: rate_limit as f64,
                last_refill: Instant::now(),
            })),
        })
    }

    /// Create a rate limiter with requests per second
    pub fn per_second(requests_per_second: u32) -> Result<Self, ResilienceError> {
        Self::new(requests_per_second, Duration::from_secs(1))
    }

    /// Create a rate limiter with requests per minute
    pub fn per_minute(requests_per_minute: u32) -> Result<Self, ResilienceError> {
        Self::new(requests_per_minute, Duration::from_secs(60))
    }

    /// Tokens added per second
    pub fn refill_rate(&self) -> f64 {
        self.rate_limit as f64 / self.period.as_secs_f64()
    }

    /// Wait until a token is available, then consume it
    ///
    /// Never fails. Concurrent callers queue on the bucket lock in arrival
    /// order, so a waiting caller holds its place while it sleeps.
    pub async fn acquire(&self) {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket, Instant::now());

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return;
        }

        let wait = Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_rate());
        debug!(wait_ms = wait.as_millis() as u64, "rate limiter waiting for token");
        tokio::time::sleep(wait).await;

        // The token that accumulated during the wait is the one being spent.
        bucket.tokens = 0.0;
        bucket.last_refill = Instant::now();
    }

    /// Take a token without waiting
    ///
    /// Returns `RateLimitExceeded` if the bucket is empty or another caller
    /// is currently waiting for a token.
    pub fn try_acquire(&self) -> Result<(), ResilienceError> {
        let mut bucket = self
            .bucket
            .try_lock()
            .map_err(|_| ResilienceError::RateLimitExceeded)?;
        self.refill(&mut bucket, Instant::now());

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(ResilienceError::RateLimitExceeded)
        }
    }

    /// Execute an operation with rate limiting
    ///
    /// This will wait until a token is available before executing the operation.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ResilienceError>>,
    {
        self.acquire().await;
        op().await
    }

    /// Try to execute an operation without waiting
    ///
    /// Returns RateLimitExceeded if rate limit is hit.
    pub async fn try_execute<F, Fut, T>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ResilienceError>>,
    {
        self.try_acquire()?;
        op().await
    }

    /// Snapshot of the tokens currently available (after refill)
    pub async fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }

    /// Get the maximum requests per period
    pub fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    /// Get the rate limit period
    pub fn period(&self) -> Duration {
        self.period
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.refill_rate())
            .min(self.rate_limit as f64);
    }
}

#[async_trait]
impl Admission for RateLimiter {
    async fn acquire(&self) {
        RateLimiter::acquire(self).await
    }

    fn try_acquire(&self) -> Result<(), ResilienceError> {
        RateLimiter::try_acquire(self)
    }
}

/// Rate limiter backed by the governor crate (when feature is enabled)
///
/// Uses GCRA instead of a float bucket; useful when admission checks are
/// very hot. It reads the system clock, so it does not follow tokio's
/// paused test clock.
#[cfg(feature = "governor-impl")]
pub mod governor_impl {
    use super::*;
    use governor::{
        clock::DefaultClock,
        state::{InMemoryState, NotKeyed},
        Quota,
    };
    use std::num::NonZeroU32;

    type DirectLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

    /// Rate limiter wrapper using governor
    #[derive(Clone)]
    pub struct GovernorRateLimiter {
        limiter: Arc<DirectLimiter>,
    }

    impl GovernorRateLimiter {
        /// Create a new governor-based rate limiter allowing `rate_limit`
        /// requests per `period`, with a burst of `rate_limit`
        pub fn new(rate_limit: u32, period: Duration) -> Result<Self, ResilienceError> {
            let burst = NonZeroU32::new(rate_limit).ok_or_else(|| {
                ResilienceError::InvalidConfig("rate_limit must be > 0".to_string())
            })?;

            let quota = Quota::with_period(period / rate_limit)
                .ok_or_else(|| {
                    ResilienceError::InvalidConfig("time_period must be > 0".to_string())
                })?
                .allow_burst(burst);

            Ok(Self {
                limiter: Arc::new(DirectLimiter::direct(quota)),
            })
        }
    }

    #[async_trait]
    impl Admission for GovernorRateLimiter {
        async fn acquire(&self) {
            self.limiter.until_ready().await;
        }

        fn try_acquire(&self) -> Result<(), ResilienceError> {
            self.limiter
                .check()
                .map_err(|_| ResilienceError::RateLimitExceeded)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_governor_burst_then_reject() {
            let limiter = GovernorRateLimiter::new(3, Duration::from_secs(60)).unwrap();
            for _ in 0..3 {
                assert!(limiter.try_acquire().is_ok());
            }
            assert_eq!(
                limiter.try_acquire(),
                Err(ResilienceError::RateLimitExceeded)
            );
        }

        #[test]
        fn test_governor_rejects_zero_rate() {
            assert!(GovernorRateLimiter::new(0, Duration::from_secs(1)).is_err());
        }
    }
}
