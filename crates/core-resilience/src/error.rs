//! Error types for the resilience primitives
//!
//! Every component in the toolkit reports failures through [`ResilienceError`].
//! Units of work supplied by callers return it too, which lets a failure flow
//! unchanged through a retry executor, a circuit breaker and a worker pool.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in resilience operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResilienceError {
    /// Circuit breaker is open, rejecting requests
    #[error("Circuit breaker is open, failing fast")]
    CircuitOpen,

    /// Rate limit exceeded (only returned by non-waiting admission)
    #[error("Rate limit exceeded, no token available")]
    RateLimitExceeded,

    /// Transient error that may be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// The remote side could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// A suspension point exceeded its deadline
    #[error("Operation timeout after {0:?}")]
    Timeout(Duration),

    /// The operation was cancelled and its cleanup has run
    #[error("Operation cancelled")]
    Cancelled,

    /// Every attempt failed; carries the failure of the final attempt
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ResilienceError>,
    },

    /// The channel was closed before the item could be enqueued
    #[error("Channel is closed")]
    ChannelClosed,

    /// A spawned task panicked
    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    /// A component was constructed with invalid settings
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ResilienceError {
    /// Classify this error
    pub fn kind(&self) -> FailureKind {
        match self {
            ResilienceError::CircuitOpen => FailureKind::CircuitOpen,
            ResilienceError::RateLimitExceeded => FailureKind::RateLimited,
            ResilienceError::Transient(_) => FailureKind::Transient,
            ResilienceError::Permanent(_) => FailureKind::Permanent,
            ResilienceError::Connection(_) => FailureKind::Connection,
            ResilienceError::Timeout(_) => FailureKind::Timeout,
            ResilienceError::Cancelled => FailureKind::Cancelled,
            ResilienceError::RetriesExhausted { .. } => FailureKind::Exhausted,
            ResilienceError::ChannelClosed => FailureKind::ChannelClosed,
            ResilienceError::TaskPanicked(_) => FailureKind::Panicked,
            ResilienceError::InvalidConfig(_) => FailureKind::Config,
        }
    }

    /// Check if this error is transient and can be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResilienceError::Transient(_)
                | ResilienceError::Connection(_)
                | ResilienceError::RateLimitExceeded
                | ResilienceError::Timeout(_)
        )
    }

    /// Check if this error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ResilienceError::Permanent(_)
                | ResilienceError::CircuitOpen
                | ResilienceError::InvalidConfig(_)
        )
    }

    /// Check if this error could contribute to a circuit breaker failure count
    ///
    /// Fail-fast signals produced by the toolkit itself never do.
    pub fn should_trip_breaker(&self) -> bool {
        !matches!(
            self,
            ResilienceError::CircuitOpen
                | ResilienceError::RateLimitExceeded
                | ResilienceError::Cancelled
                | ResilienceError::InvalidConfig(_)
        )
    }

    /// The underlying failure, looking through `RetriesExhausted`
    pub fn root_cause(&self) -> &ResilienceError {
        match self {
            ResilienceError::RetriesExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}

/// Static classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    CircuitOpen,
    RateLimited,
    Transient,
    Permanent,
    Connection,
    Timeout,
    Cancelled,
    Exhausted,
    ChannelClosed,
    Panicked,
    Config,
}

impl FailureKind {
    /// Every kind, in declaration order
    pub const ALL: [FailureKind; 11] = [
        FailureKind::CircuitOpen,
        FailureKind::RateLimited,
        FailureKind::Transient,
        FailureKind::Permanent,
        FailureKind::Connection,
        FailureKind::Timeout,
        FailureKind::Cancelled,
        FailureKind::Exhausted,
        FailureKind::ChannelClosed,
        FailureKind::Panicked,
        FailureKind::Config,
    ];

    const fn bit(self) -> u16 {
        1 << (self as u16)
    }

    /// Stable snake_case name, used by configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::Connection => "connection",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Exhausted => "exhausted",
            FailureKind::ChannelClosed => "channel_closed",
            FailureKind::Panicked => "panicked",
            FailureKind::Config => "config",
        }
    }

    /// Parse a name produced by [`FailureKind::as_str`]
    pub fn parse(name: &str) -> Option<Self> {
        FailureKind::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of [`FailureKind`]s
///
/// Used for the circuit breaker's expected failures and the retry
/// executor's retryable failures.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FailureSet(u16);

impl FailureSet {
    /// The empty set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Failures raised by units of work themselves
    ///
    /// Excludes the fail-fast signals the toolkit produces on its own.
    pub const fn operation_failures() -> Self {
        Self::empty()
            .with(FailureKind::Transient)
            .with(FailureKind::Permanent)
            .with(FailureKind::Connection)
            .with(FailureKind::Timeout)
            .with(FailureKind::Panicked)
    }

    /// Failures worth retrying
    pub const fn transient() -> Self {
        Self::empty()
            .with(FailureKind::Transient)
            .with(FailureKind::Connection)
            .with(FailureKind::Timeout)
    }

    /// Build a set from a slice of kinds
    pub fn of(kinds: &[FailureKind]) -> Self {
        kinds.iter().fold(Self::empty(), |set, kind| set.with(*kind))
    }

    /// Add a kind
    pub const fn with(self, kind: FailureKind) -> Self {
        Self(self.0 | kind.bit())
    }

    /// Remove a kind
    pub const fn without(self, kind: FailureKind) -> Self {
        Self(self.0 & !kind.bit())
    }

    pub const fn contains(&self, kind: FailureKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Whether `error` belongs to this set
    pub fn matches(&self, error: &ResilienceError) -> bool {
        self.contains(error.kind())
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate the kinds in this set
    pub fn iter(&self) -> impl Iterator<Item = FailureKind> + '_ {
        FailureKind::ALL.into_iter().filter(|k| self.contains(*k))
    }
}

impl fmt::Debug for FailureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<FailureKind> for FailureSet {
    fn from_iter<I: IntoIterator<Item = FailureKind>>(iter: I) -> Self {
        iter.into_iter()
            .fold(FailureSet::empty(), |set, kind| set.with(kind))
    }
}
