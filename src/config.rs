/*!
 * Configuration types for Conflux
 *
 * One TOML file configures every component. Each section has serde defaults
 * so partial files load, and each knows how to build its component.
 */

use crate::error::{ConfluxError, Result};
use conflux_core_pipeline::{BoundedChannel, ScatterGather, WorkerPoolBuilder};
use conflux_core_resilience::{
    CircuitBreaker, CircuitBreakerConfig, FailureKind, FailureSet, RateLimiter, RetryExecutor,
    RetryPolicy,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the toolkit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfluxConfig {
    #[serde(default)]
    pub rate_limiter: RateLimiterSection,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub channel: ChannelSection,

    #[serde(default)]
    pub worker_pool: WorkerPoolSection,

    #[serde(default)]
    pub scatter_gather: ScatterGatherSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[rate_limiter]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterSection {
    /// Requests admitted per period, also the burst size
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,

    /// Length of the period in seconds
    #[serde(default = "default_time_period")]
    pub time_period_secs: f64,
}

/// `[circuit_breaker]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSection {
    /// Consecutive expected failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a trial call
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: f64,

    /// Failure kinds that count toward the threshold
    /// (e.g. "connection", "timeout", "transient")
    #[serde(default = "default_expected_failures")]
    pub expected_failures: Vec<String>,
}

/// `[retry]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    /// Attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in seconds
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: f64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Cap for any single delay, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_secs: Option<f64>,

    /// Random fraction (0.0-1.0) added to each delay
    #[serde(default)]
    pub jitter: f64,

    /// Failure kinds worth another attempt
    #[serde(default = "default_retry_on")]
    pub retry_on: Vec<String>,
}

/// `[channel]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSection {
    /// Maximum buffered items (0 = unbounded)
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

/// `[worker_pool]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolSection {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

/// `[scatter_gather]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScatterGatherSection {
    #[serde(default = "default_chunk_count")]
    pub chunk_count: usize,
}

/// `[logging]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for level = debug)
    #[serde(default)]
    pub verbose: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_rate_limit() -> u32 {
    5
}

fn default_time_period() -> f64 {
    1.0
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> f64 {
    5.0
}

fn default_expected_failures() -> Vec<String> {
    kind_names(FailureSet::operation_failures())
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> f64 {
    0.5
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_retry_on() -> Vec<String> {
    kind_names(FailureSet::operation_failures())
}

fn default_capacity() -> usize {
    5
}

fn default_worker_count() -> usize {
    3
}

fn default_chunk_count() -> usize {
    5
}

fn kind_names(set: FailureSet) -> Vec<String> {
    set.iter().map(|kind| kind.as_str().to_string()).collect()
}

impl Default for RateLimiterSection {
    fn default() -> Self {
        Self {
            rate_limit: default_rate_limit(),
            time_period_secs: default_time_period(),
        }
    }
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
            expected_failures: default_expected_failures(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay(),
            backoff_factor: default_backoff_factor(),
            max_delay_secs: None,
            jitter: 0.0,
            retry_on: default_retry_on(),
        }
    }
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

impl Default for WorkerPoolSection {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
        }
    }
}

impl Default for ScatterGatherSection {
    fn default() -> Self {
        Self {
            chunk_count: default_chunk_count(),
        }
    }
}

/// Convert a seconds value, rejecting zero, negative and non-finite input
fn positive_secs(field: &str, secs: f64) -> Result<Duration> {
    if !(secs.is_finite() && secs > 0.0) {
        return Err(ConfluxError::Config(format!(
            "{field} must be a positive number of seconds, got {secs}"
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ConfluxError::Config(format!("{field} is out of range: {e}")))
}

/// Parse failure kind names into a set
fn parse_kinds(field: &str, names: &[String]) -> Result<FailureSet> {
    names
        .iter()
        .map(|name| {
            FailureKind::parse(name).ok_or_else(|| {
                ConfluxError::Config(format!("{field}: unknown failure kind '{name}'"))
            })
        })
        .collect()
}

impl RateLimiterSection {
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit == 0 {
            return Err(ConfluxError::Config(
                "rate_limiter.rate_limit must be > 0".to_string(),
            ));
        }
        positive_secs("rate_limiter.time_period_secs", self.time_period_secs)?;
        Ok(())
    }

    pub fn build(&self) -> Result<RateLimiter> {
        let period = positive_secs("rate_limiter.time_period_secs", self.time_period_secs)?;
        Ok(RateLimiter::new(self.rate_limit, period)?)
    }
}

impl CircuitBreakerSection {
    pub fn validate(&self) -> Result<()> {
        self.to_config()?.validate()?;
        Ok(())
    }

    pub fn to_config(&self) -> Result<CircuitBreakerConfig> {
        if self.failure_threshold == 0 {
            return Err(ConfluxError::Config(
                "circuit_breaker.failure_threshold must be > 0".to_string(),
            ));
        }
        Ok(CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: positive_secs(
                "circuit_breaker.recovery_timeout_secs",
                self.recovery_timeout_secs,
            )?,
            expected_failures: parse_kinds(
                "circuit_breaker.expected_failures",
                &self.expected_failures,
            )?,
        })
    }

    pub fn build(&self) -> Result<CircuitBreaker> {
        Ok(CircuitBreaker::new(self.to_config()?)?)
    }
}

impl RetrySection {
    pub fn validate(&self) -> Result<()> {
        self.to_policy()?.validate()?;
        Ok(())
    }

    /// Build the policy without validating its numeric bounds
    pub fn to_policy(&self) -> Result<RetryPolicy> {
        // Attempt count, backoff factor and jitter are checked by RetryPolicy::validate.
        // A zero base delay is allowed: retry immediately
        let base_delay = if self.base_delay_secs == 0.0 {
            Duration::ZERO
        } else {
            positive_secs("retry.base_delay_secs", self.base_delay_secs)?
        };
        let max_delay = self
            .max_delay_secs
            .map(|secs| positive_secs("retry.max_delay_secs", secs))
            .transpose()?;

        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay,
            backoff_factor: self.backoff_factor,
            max_delay,
            jitter_factor: self.jitter,
            retry_on: parse_kinds("retry.retry_on", &self.retry_on)?,
        })
    }

    pub fn build(&self) -> Result<RetryExecutor> {
        Ok(RetryExecutor::new(self.to_policy()?)?)
    }
}

impl ChannelSection {
    pub fn build<T>(&self) -> BoundedChannel<T> {
        BoundedChannel::new(self.capacity)
    }
}

impl WorkerPoolSection {
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(ConfluxError::Config(
                "worker_pool.worker_count must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Start a pool builder; the queue capacity comes from `[channel]`
    pub fn builder(&self, channel: &ChannelSection) -> WorkerPoolBuilder {
        WorkerPoolBuilder::new(self.worker_count).capacity(channel.capacity)
    }
}

impl ScatterGatherSection {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_count == 0 {
            return Err(ConfluxError::Config(
                "scatter_gather.chunk_count must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn build(&self) -> Result<ScatterGather> {
        Ok(ScatterGather::new(self.chunk_count)?)
    }
}

impl ConfluxConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfluxError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ConfluxConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Check every section, reporting the first problem found
    pub fn validate(&self) -> Result<()> {
        self.rate_limiter.validate()?;
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        self.worker_pool.validate()?;
        self.scatter_gather.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConfluxConfig::default();
        assert_eq!(config.rate_limiter.rate_limit, 5);
        assert_eq!(config.rate_limiter.time_period_secs, 1.0);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.channel.capacity, 5);
        assert_eq!(config.worker_pool.worker_count, 3);
        assert_eq!(config.scatter_gather.chunk_count, 5);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialization() {
        let config = ConfluxConfig::default();
        let toml = config.to_toml_string().unwrap();
        let deserialized = ConfluxConfig::from_toml_str(&toml).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = ConfluxConfig::from_toml_str(
            r#"
[circuit_breaker]
failure_threshold = 3
recovery_timeout_secs = 2.0
expected_failures = ["connection"]

[logging]
level = "debug"
"#,
        )
        .unwrap();

        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.rate_limiter, RateLimiterSection::default());
        assert_eq!(config.logging.level, LogLevel::Debug);

        let breaker = config.circuit_breaker.to_config().unwrap();
        assert_eq!(breaker.recovery_timeout, Duration::from_secs(2));
        assert_eq!(
            breaker.expected_failures,
            FailureSet::of(&[FailureKind::Connection])
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ConfluxConfig::default();
        config.rate_limiter.rate_limit = 0;
        assert!(matches!(config.validate(), Err(ConfluxError::Config(_))));

        let mut config = ConfluxConfig::default();
        config.rate_limiter.time_period_secs = -1.0;
        assert!(config.validate().is_err());

        let mut config = ConfluxConfig::default();
        config.circuit_breaker.recovery_timeout_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = ConfluxConfig::default();
        config.retry.backoff_factor = 0.5;
        assert!(config.validate().is_err());

        let mut config = ConfluxConfig::default();
        config.worker_pool.worker_count = 0;
        assert!(config.validate().is_err());

        let mut config = ConfluxConfig::default();
        config.scatter_gather.chunk_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_failure_kind() {
        let section = RetrySection {
            retry_on: vec!["connection".into(), "gremlins".into()],
            ..Default::default()
        };
        let err = section.to_policy().unwrap_err();
        assert!(err.to_string().contains("gremlins"));
    }

    #[test]
    fn test_retry_policy_from_section() {
        let section = RetrySection {
            max_attempts: 5,
            base_delay_secs: 0.5,
            backoff_factor: 1.5,
            max_delay_secs: Some(4.0),
            jitter: 0.1,
            retry_on: vec!["connection".into()],
        };
        let policy = section.to_policy().unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Some(Duration::from_secs(4)));
        assert!(policy.retry_on.contains(FailureKind::Connection));
        assert!(!policy.retry_on.contains(FailureKind::Transient));
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Warn.to_tracing_level(), tracing::Level::WARN);
        assert_eq!(LogLevel::Info.to_tracing_level(), tracing::Level::INFO);
        assert_eq!(LogLevel::Debug.to_tracing_level(), tracing::Level::DEBUG);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
