//! Conflux Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides building blocks for coordinating units of work that
//! may succeed, may fail, and may be slow. It includes:
//!
//! - **Rate Limiter**: Token bucket admission control; waits, never rejects
//! - **Circuit Breaker**: Fails fast while a protected operation is unhealthy
//! - **Retry Executor**: Absorbs transient failures with exponential backoff
//! - **Timeouts**: Deadlines for any suspension point, reported as `Timeout`
//! - **Cancellation**: Cooperative cancel, then clean up, then propagate
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Storage systems
//! - Network protocols
//! - Application-specific concerns
//!
//! All state is in memory and owned by each component instance. Units of work
//! are borrowed for one invocation and never retained.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Rate Limiter                      │  ← Admission
//! │  (Token bucket, waits for refill)       │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! │  (Tracks failures, opens on threshold)  │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retry Executor                    │  ← Transient failures
//! │  (Exponential backoff, max attempts)    │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!          Unit of work
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use conflux_core_resilience::prelude::*;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let limiter = RateLimiter::new(5, Duration::from_secs(1))?;
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig {
//!     failure_threshold: 3,
//!     recovery_timeout: Duration::from_secs(2),
//!     expected_failures: FailureSet::of(&[FailureKind::Connection]),
//! })?;
//! let retry = RetryExecutor::new(RetryPolicy::new(3, Duration::from_millis(200), 2.0))?;
//!
//! limiter.acquire().await;
//! let value = breaker
//!     .call(|| retry.run(|| async { Ok::<_, ResilienceError>(42) }))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod circuit_breaker;
pub mod error;
pub mod rate_limiter;
pub mod retry;
pub mod timeout;

// Re-export main types for convenience
pub use cancel::{run_cancellable, CancelToken};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStats};
pub use error::{FailureKind, FailureSet, ResilienceError};
pub use rate_limiter::{Admission, RateLimiter};
pub use retry::{retry_with_backoff, RetryAttempt, RetryExecutor, RetryPolicy};
pub use timeout::{with_deadline, with_timeout};

#[cfg(feature = "governor-impl")]
pub use rate_limiter::governor_impl::GovernorRateLimiter;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use conflux_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::cancel::{run_cancellable, CancelToken};
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use super::error::{FailureKind, FailureSet, ResilienceError};
    pub use super::rate_limiter::{Admission, RateLimiter};
    pub use super::retry::{RetryExecutor, RetryPolicy};
    pub use super::timeout::{with_deadline, with_timeout};
}
