/*!
 * Toolkit facade: every component built from one configuration
 */

use crate::config::ConfluxConfig;
use crate::error::Result;
use conflux_core_pipeline::{BoundedChannel, FanOutFanIn, ScatterGather, WorkerPool};
use conflux_core_resilience::{CircuitBreaker, RateLimiter, ResilienceError, RetryExecutor};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Shared limiter, breaker and retry executor plus factories for the
/// work distribution patterns
///
/// Cloning shares the limiter bucket and the circuit state.
///
/// # Example
/// ```no_run
/// use conflux::{ConfluxConfig, Toolkit};
/// use conflux_core_resilience::ResilienceError;
///
/// # async fn example() -> conflux::Result<()> {
/// let toolkit = Toolkit::from_config(&ConfluxConfig::default())?;
/// let _body = toolkit
///     .call(|| async { Ok::<_, ResilienceError>("response") })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Toolkit {
    config: Arc<ConfluxConfig>,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry: RetryExecutor,
}

impl Toolkit {
    /// Validate `config` and build every shared component
    pub fn from_config(config: &ConfluxConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            limiter: config.rate_limiter.build()?,
            breaker: config.circuit_breaker.build()?,
            retry: config.retry.build()?,
            config: Arc::new(config.clone()),
        })
    }

    pub fn config(&self) -> &ConfluxConfig {
        &self.config
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Run one unit of work through admission, the breaker and retries
    ///
    /// Waits for a token, then calls through the circuit breaker, which in
    /// turn retries the operation per the retry policy. An exhausted retry
    /// counts as one failure against the circuit.
    pub async fn call<F, Fut, T>(&self, op: F) -> std::result::Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ResilienceError>>,
    {
        self.limiter.acquire().await;
        debug!(state = ?self.breaker.state(), "admitted call");
        self.breaker.call(|| self.retry.run(op)).await
    }

    /// Channel sized by `[channel]`
    pub fn channel<T>(&self) -> BoundedChannel<T> {
        self.config.channel.build()
    }

    /// Worker pool sized by `[worker_pool]` and `[channel]`
    pub fn worker_pool<T, F, Fut>(&self, handler: F) -> Result<WorkerPool<T>>
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), ResilienceError>> + Send + 'static,
    {
        Ok(self
            .config
            .worker_pool
            .builder(&self.config.channel)
            .spawn(handler)?)
    }

    /// Worker pool whose workers share this toolkit's rate limiter
    pub fn throttled_worker_pool<T, F, Fut>(&self, handler: F) -> Result<WorkerPool<T>>
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), ResilienceError>> + Send + 'static,
    {
        Ok(self
            .config
            .worker_pool
            .builder(&self.config.channel)
            .admission(Arc::new(self.limiter.clone()))
            .spawn(handler)?)
    }

    /// Scatter-gather with `[scatter_gather]` partitions
    pub fn scatter_gather(&self) -> Result<ScatterGather> {
        self.config.scatter_gather.build()
    }

    pub fn fan_out(&self) -> FanOutFanIn {
        FanOutFanIn::new()
    }
}
