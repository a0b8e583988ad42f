//! Retry with exponential backoff
//!
//! Attempts a unit of work up to `max_attempts` times. The delay before
//! retry `k` (after the k-th failure) is `base_delay * backoff_factor^(k-1)`,
//! optionally capped and jittered. Success on any attempt returns at once.
//!
//! When every attempt fails, the caller receives
//! [`ResilienceError::RetriesExhausted`] carrying the final attempt's error
//! unchanged. Failures outside the policy's retryable set are returned
//! immediately, untouched.

use super::error::{FailureSet, ResilienceError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Multiplier applied to the delay after each failure
    pub backoff_factor: f64,

    /// Upper bound for any single delay
    pub max_delay: Option<Duration>,

    /// Jitter factor (0.0-1.0), extra random fraction added to each delay
    pub jitter_factor: f64,

    /// Failure kinds worth another attempt
    pub retry_on: FailureSet,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: None,
            jitter_factor: 0.0,
            retry_on: FailureSet::operation_failures(),
        }
    }
}

impl RetryPolicy {
    /// Policy with the three classic knobs and everything else defaulted
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Create a policy for network-flaky scenarios
    pub fn network() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Some(Duration::from_secs(30)),
            jitter_factor: 0.3,
            retry_on: FailureSet::transient(),
        }
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.max_attempts == 0 {
            return Err(ResilienceError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "backoff_factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ResilienceError::InvalidConfig(format!(
                "jitter_factor must be within 0.0..=1.0, got {}",
                self.jitter_factor
            )));
        }
        Ok(())
    }

    /// Delay after failed attempt `attempt` (1-based), before jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);

        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 {
            return delay;
        }
        let jitter = rand::rng().random_range(0.0..self.jitter_factor);
        let extra = Duration::try_from_secs_f64(delay.as_secs_f64() * jitter).unwrap_or(Duration::MAX);
        delay.saturating_add(extra)
    }
}

/// Record of one failed attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    /// 1-based attempt number
    pub attempt: u32,
    /// Sleep scheduled before the next attempt, `None` after the last one
    pub delay_before_next: Option<Duration>,
    pub error: ResilienceError,
}

/// Runs units of work under a [`RetryPolicy`]
///
/// # Example
/// ```no_run
/// use conflux_core_resilience::{ResilienceError, RetryExecutor, RetryPolicy};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), ResilienceError> {
/// let retry = RetryExecutor::new(RetryPolicy::new(3, Duration::from_millis(100), 2.0))?;
/// let value = retry.run(|| async { Ok::<_, ResilienceError>(1) }).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Result<Self, ResilienceError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out
    pub async fn run<F, Fut, T>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        self.run_inner(op, None).await
    }

    /// Like [`RetryExecutor::run`], also returning every failed attempt
    pub async fn run_with_attempts<F, Fut, T>(
        &self,
        op: F,
    ) -> (Result<T, ResilienceError>, Vec<RetryAttempt>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let mut attempts = Vec::new();
        let result = self.run_inner(op, Some(&mut attempts)).await;
        (result, attempts)
    }

    async fn run_inner<F, Fut, T>(
        &self,
        mut op: F,
        mut history: Option<&mut Vec<RetryAttempt>>,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match op().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            if !self.policy.retry_on.matches(&error) {
                debug!(attempt, kind = %error.kind(), "non-retryable failure");
                return Err(error);
            }

            if attempt >= self.policy.max_attempts {
                warn!(attempts = attempt, error = %error, "all retry attempts failed");
                if let Some(history) = history.as_deref_mut() {
                    history.push(RetryAttempt {
                        attempt,
                        delay_before_next: None,
                        error: error.clone(),
                    });
                }
                return Err(ResilienceError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.policy.jittered(self.policy.delay_for(attempt));
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, retrying"
            );
            if let Some(history) = history.as_deref_mut() {
                history.push(RetryAttempt {
                    attempt,
                    delay_before_next: Some(delay),
                    error,
                });
            }

            tokio::time::sleep(delay).await;
        }
    }
}

/// Retry `op` with exponential backoff
///
/// Shorthand for a [`RetryExecutor`] built from the three classic knobs.
pub async fn retry_with_backoff<F, Fut, T>(
    op: F,
    max_attempts: u32,
    base_delay: Duration,
    backoff_factor: f64,
) -> Result<T, ResilienceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ResilienceError>>,
{
    RetryExecutor::new(RetryPolicy::new(max_attempts, base_delay, backoff_factor))?
        .run(op)
        .await
}
