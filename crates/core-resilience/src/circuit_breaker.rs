//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents cascading failures by failing fast when a service
//! is experiencing issues. It has three states:
//! - Closed: Normal operation, requests pass through
//! - Open: Service is unhealthy, requests fail immediately
//! - HalfOpen: Testing if service has recovered with a single trial call
//!
//! Only failures whose kind is in the configured expected set count toward the
//! threshold. Any other failure is returned to the caller without touching the
//! circuit. Successes while closed leave the count alone; it is cleared only
//! when the circuit closes again.
//!
//! Any counted failure while half-open reopens the circuit, including a late
//! failure from a call admitted before the circuit opened. A trial admitted
//! in an earlier half-open window no longer decides recovery once the circuit
//! has reopened.

use super::error::{FailureSet, ResilienceError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately
    /// Next probe time indicates when to try half-open
    Open { next_probe: Instant },
    /// Circuit is half-open, testing service recovery
    HalfOpen,
}

impl CircuitState {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitState::Open { .. })
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of expected failures since the circuit last closed before opening it
    pub failure_threshold: u32,
    /// Duration to wait before transitioning from open to half-open
    pub recovery_timeout: Duration,
    /// Failure kinds that count toward the threshold
    ///
    /// An exhausted retry counts when either `Exhausted` or the kind of its
    /// last error is in the set.
    pub expected_failures: FailureSet,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(5),
            expected_failures: FailureSet::operation_failures(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::InvalidConfig(
                "failure_threshold must be > 0".to_string(),
            ));
        }
        if self.recovery_timeout.is_zero() {
            return Err(ResilienceError::InvalidConfig(
                "recovery_timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Counters describing breaker activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitStats {
    /// Calls that reached the wrapped operation
    pub admitted_calls: u64,
    /// Calls rejected with `CircuitOpen` without invoking the operation
    pub rejected_calls: u64,
    pub successful_calls: u64,
    /// Expected failures recorded against the circuit
    pub counted_failures: u64,
    /// Failures outside the expected set, passed through untouched
    pub ignored_failures: u64,
    /// Number of Closed/HalfOpen to Open transitions
    pub times_opened: u64,
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct CircuitBreakerState {
    /// Current state of the circuit
    state: CircuitState,
    /// Expected failures since the circuit last closed
    consecutive_failures: u32,
    /// Time of the most recent expected failure
    last_failure: Option<Instant>,
    /// Whether the single half-open trial call is running
    trial_in_flight: bool,
    stats: CircuitStats,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            trial_in_flight: false,
            stats: CircuitStats::default(),
        }
    }
}

/// Circuit breaker for protecting against cascading failures
///
/// Cloning yields a handle to the same circuit.
///
/// # Example
/// ```no_run
/// use conflux_core_resilience::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), ResilienceError> {
///     let breaker = CircuitBreaker::new(CircuitBreakerConfig::default())?;
///
///     // Execute operation with circuit breaker protection
///     let result = breaker.call(|| async {
///         // Your operation here
///         Ok::<_, ResilienceError>(42)
///     }).await?;
///
///     println!("Result: {}", result);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, ResilienceError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CircuitBreakerState::new())),
        })
    }

    /// Create a new circuit breaker with default configuration
    pub fn new_default() -> Self {
        Self {
            config: Arc::new(CircuitBreakerConfig::default()),
            state: Arc::new(Mutex::new(CircuitBreakerState::new())),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Expected failures counted since the circuit last closed
    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Time of the most recent counted failure
    pub fn last_failure(&self) -> Option<Instant> {
        self.lock().last_failure
    }

    pub fn stats(&self) -> CircuitStats {
        self.lock().stats.clone()
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut state = self.lock();
        state.state = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.trial_in_flight = false;
        info!("circuit breaker reset to closed");
    }

    /// Force the circuit open for one recovery timeout
    pub fn trip(&self) {
        let mut state = self.lock();
        let now = Instant::now();
        state.last_failure = Some(now);
        self.open(&mut state, now);
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// While open, fails with `CircuitOpen` without invoking `op`. The
    /// operation's own failure is always returned unchanged.
    ///
    /// If the returned future is dropped while a half-open trial is running,
    /// the trial slot is released and the circuit stays half-open.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ResilienceError>>,
    {
        let mut permit = self.admit()?;

        match op().await {
            Ok(result) => {
                permit.settle(None);
                Ok(result)
            }
            Err(e) => {
                permit.settle(Some(&e));
                Err(e)
            }
        }
    }

    /// Check circuit state and update if necessary
    fn admit(&self) -> Result<CallPermit<'_>, ResilienceError> {
        let mut state = self.lock();

        let trial = match state.state {
            CircuitState::Closed => false,
            CircuitState::Open { next_probe } => {
                if Instant::now() >= next_probe {
                    info!("circuit half-open, admitting trial call");
                    state.state = CircuitState::HalfOpen;
                    true
                } else {
                    state.stats.rejected_calls += 1;
                    return Err(ResilienceError::CircuitOpen);
                }
            }
            CircuitState::HalfOpen if state.trial_in_flight => {
                state.stats.rejected_calls += 1;
                return Err(ResilienceError::CircuitOpen);
            }
            CircuitState::HalfOpen => true,
        };

        if trial {
            state.trial_in_flight = true;
        }
        state.stats.admitted_calls += 1;

        Ok(CallPermit {
            breaker: self,
            trial,
            generation: state.stats.times_opened,
            settled: false,
        })
    }

    /// Handle successful operation
    fn on_success(&self, state: &mut CircuitBreakerState, trial: bool) {
        state.stats.successful_calls += 1;

        // Only the trial decides recovery
        if trial && state.state == CircuitState::HalfOpen {
            info!("trial call succeeded, closing circuit");
            state.state = CircuitState::Closed;
            state.consecutive_failures = 0;
        }
    }

    /// Handle failed operation
    fn on_failure(&self, state: &mut CircuitBreakerState, error: &ResilienceError, trial: bool) {
        let expected = self.config.expected_failures.matches(error)
            || self.config.expected_failures.matches(error.root_cause());
        if !(error.should_trip_breaker() && expected) {
            state.stats.ignored_failures += 1;
            debug!(kind = %error.kind(), "failure outside expected set, circuit untouched");
            return;
        }

        let now = Instant::now();
        state.stats.counted_failures += 1;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = Some(now);

        match state.state {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = state.consecutive_failures,
                        "failure threshold reached, opening circuit"
                    );
                    self.open(state, now);
                }
            }
            CircuitState::HalfOpen if trial => {
                warn!("trial call failed, reopening circuit");
                self.open(state, now);
            }
            CircuitState::Open { .. } => {
                // Late failure from a call admitted earlier restarts the cooldown
                state.state = CircuitState::Open {
                    next_probe: now + self.config.recovery_timeout,
                };
            }
            CircuitState::HalfOpen => {
                warn!("failure while half-open, reopening circuit");
                self.open(state, now);
            }
        }
    }

    fn open(&self, state: &mut CircuitBreakerState, now: Instant) {
        state.state = CircuitState::Open {
            next_probe: now + self.config.recovery_timeout,
        };
        state.trial_in_flight = false;
        state.stats.times_opened += 1;
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        // Counters are updated in single statements; a poisoned guard is still coherent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Admission granted for one call
///
/// Dropping an unsettled trial permit gives the trial slot back.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    /// `times_opened` at admission; a reopen since then retires the trial
    generation: u64,
    settled: bool,
}

impl CallPermit<'_> {
    fn live_trial(&self, state: &CircuitBreakerState) -> bool {
        self.trial && state.stats.times_opened == self.generation
    }

    fn settle(&mut self, failure: Option<&ResilienceError>) {
        let mut state = self.breaker.lock();
        let trial = self.live_trial(&state);
        match failure {
            None => self.breaker.on_success(&mut state, trial),
            Some(error) => self.breaker.on_failure(&mut state, error, trial),
        }
        if trial {
            state.trial_in_flight = false;
        }
        self.settled = true;
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.breaker.lock();
        if self.live_trial(&state) {
            debug!("trial call cancelled, releasing half-open slot");
            state.trial_in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn connection_breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: timeout,
            expected_failures: FailureSet::of(&[FailureKind::Connection]),
        })
        .unwrap()
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), ResilienceError> {
        breaker
            .call(|| async { Err(ResilienceError::Connection("unavailable".to_string())) })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_closed_to_open() {
        let breaker = connection_breaker(3, Duration::from_millis(100));

        for _ in 0..2 {
            assert!(fail(&breaker).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        let err = fail(&breaker).await.unwrap_err();
        assert_eq!(err, ResilienceError::Connection("unavailable".to_string()));

        match breaker.state() {
            CircuitState::Open { .. } => (),
            state => panic!("Expected Open state, got {:?}", state),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_fails_fast_without_invoking() {
        let breaker = connection_breaker(1, Duration::from_secs(2));
        let _ = fail(&breaker).await;

        let invoked = &AtomicUsize::new(0);
        let result = breaker
            .call(move || async move {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ResilienceError>(())
            })
            .await;

        assert_eq!(result, Err(ResilienceError::CircuitOpen));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.stats().rejected_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let breaker = connection_breaker(2, Duration::from_millis(50));
        for _ in 0..2 {
            let _ = fail(&breaker).await;
        }

        tokio::time::sleep(Duration::from_millis(60)).await;

        let result = breaker.call(|| async { Ok::<_, ResilienceError>(7) }).await;
        assert_eq!(result, Ok(7));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = connection_breaker(3, Duration::from_millis(50));
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(fail(&breaker).await.is_err());
        assert!(breaker.state().is_open());
        assert_eq!(breaker.stats().times_opened, 2);

        // Reopened with a fresh cooldown
        assert_eq!(fail(&breaker).await, Err(ResilienceError::CircuitOpen));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_exactly_one_trial() {
        let breaker = connection_breaker(1, Duration::from_millis(10));
        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_breaker = breaker.clone();
        let trial = tokio::spawn(async move {
            trial_breaker
                .call(move || async move {
                    let _ = release_rx.await;
                    Ok::<_, ResilienceError>("recovered")
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let concurrent = breaker.call(|| async { Ok::<_, ResilienceError>("second") }).await;
        assert_eq!(concurrent, Err(ResilienceError::CircuitOpen));

        release_tx.send(()).unwrap();
        assert_eq!(trial.await.unwrap(), Ok("recovered"));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_releases_slot() {
        let breaker = connection_breaker(1, Duration::from_millis(10));
        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let outcome = tokio::time::timeout(
            Duration::from_millis(5),
            breaker.call(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, ResilienceError>(())
            }),
        )
        .await;
        assert!(outcome.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert_eq!(breaker.call(|| async { Ok::<_, ResilienceError>(1) }).await, Ok(1));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_unexpected_failures_pass_through() {
        let breaker = connection_breaker(1, Duration::from_secs(1));

        let result: Result<(), ResilienceError> = breaker
            .call(|| async { Err(ResilienceError::Permanent("bad input".to_string())) })
            .await;

        assert_eq!(result, Err(ResilienceError::Permanent("bad input".to_string())));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.stats().ignored_failures, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retry_classified_by_root_cause() {
        let breaker = connection_breaker(1, Duration::from_secs(1));

        let result: Result<(), ResilienceError> = breaker
            .call(|| async {
                Err(ResilienceError::RetriesExhausted {
                    attempts: 2,
                    last: Box::new(ResilienceError::Connection("refused".to_string())),
                })
            })
            .await;

        assert!(result.is_err());
        assert!(breaker.state().is_open());
        assert_eq!(breaker.stats().counted_failures, 1);
    }

    #[tokio::test]
    async fn test_interleaved_successes_keep_failure_count() {
        let breaker = connection_breaker(3, Duration::from_secs(1));
        let succeed = || breaker.call(|| async { Ok::<_, ResilienceError>(()) });

        let _ = fail(&breaker).await;
        succeed().await.unwrap();
        let _ = fail(&breaker).await;
        succeed().await.unwrap();
        assert_eq!(breaker.failure_count(), 2);
        assert_eq!(breaker.state(), CircuitState::Closed);

        let _ = fail(&breaker).await;
        assert!(breaker.state().is_open());
        assert_eq!(breaker.failure_count(), 3);
        assert_eq!(breaker.stats().successful_calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_while_half_open_reopens() {
        let breaker = connection_breaker(2, Duration::from_millis(50));

        // Admitted while closed, fails only after the circuit has gone half-open
        let (late_tx, late_rx) = tokio::sync::oneshot::channel::<()>();
        let late_breaker = breaker.clone();
        let late = tokio::spawn(async move {
            late_breaker
                .call(move || async move {
                    let _ = late_rx.await;
                    Err::<(), _>(ResilienceError::Connection("reset".to_string()))
                })
                .await
        });
        tokio::task::yield_now().await;

        for _ in 0..2 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        let (trial_tx, trial_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_breaker = breaker.clone();
        let trial = tokio::spawn(async move {
            trial_breaker
                .call(move || async move {
                    let _ = trial_rx.await;
                    Ok::<_, ResilienceError>("recovered")
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        late_tx.send(()).unwrap();
        assert!(late.await.unwrap().is_err());
        assert!(breaker.state().is_open());
        assert_eq!(breaker.stats().times_opened, 2);

        // The retired trial's success does not close the reopened circuit
        trial_tx.send(()).unwrap();
        assert_eq!(trial.await.unwrap(), Ok("recovered"));
        assert!(breaker.state().is_open());
    }

    #[tokio::test]
    async fn test_reset_and_trip() {
        let breaker = connection_breaker(1, Duration::from_secs(30));
        let _ = fail(&breaker).await;

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);

        breaker.trip();
        assert!(breaker.state().is_open());
        assert!(breaker.last_failure().is_some());
    }

    #[test]
    fn test_config_validation() {
        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(CircuitBreaker::new(config).is_err());

        let config = CircuitBreakerConfig {
            recovery_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(CircuitBreaker::new(config).is_err());
    }
}
