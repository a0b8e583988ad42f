/*!
 * Error types for Conflux
 */

use conflux_core_resilience::ResilienceError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfluxError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, Error)]
pub enum ConfluxError {
    /// Configuration is invalid or could not be applied
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be read
    #[error("Failed to read {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration file is not valid TOML for this schema
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be rendered as TOML
    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A toolkit component failed
    #[error(transparent)]
    Resilience(#[from] ResilienceError),
}

impl ConfluxError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfluxError::Config(_)
            | ConfluxError::ConfigRead { .. }
            | ConfluxError::ConfigParse(_)
            | ConfluxError::ConfigSerialize(_) => EXIT_FATAL,
            ConfluxError::Resilience(ResilienceError::InvalidConfig(_)) => EXIT_FATAL,
            ConfluxError::Io(_) | ConfluxError::Resilience(_) => EXIT_PARTIAL,
        }
    }

    /// The toolkit failure behind this error, if any
    pub fn resilience(&self) -> Option<&ResilienceError> {
        match self {
            ConfluxError::Resilience(err) => Some(err),
            _ => None,
        }
    }

    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        self.resilience()
            .is_some_and(|err| err.root_cause().is_transient())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ConfluxError::Config("bad".into()).exit_code(), EXIT_FATAL);
        assert_eq!(
            ConfluxError::from(ResilienceError::InvalidConfig("x".into())).exit_code(),
            EXIT_FATAL
        );
        assert_eq!(
            ConfluxError::from(ResilienceError::CircuitOpen).exit_code(),
            EXIT_PARTIAL
        );
    }

    #[test]
    fn test_resilience_errors_pass_through() {
        let err: ConfluxError = ResilienceError::Timeout(Duration::from_secs(1)).into();
        assert_eq!(err.to_string(), "Operation timeout after 1s");
        assert_eq!(
            err.resilience(),
            Some(&ResilienceError::Timeout(Duration::from_secs(1)))
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_exhausted_transient_is_transient() {
        let err: ConfluxError = ResilienceError::RetriesExhausted {
            attempts: 3,
            last: Box::new(ResilienceError::Connection("refused".into())),
        }
        .into();
        assert!(err.is_transient());
        assert!(!ConfluxError::Config("bad".into()).is_transient());
    }

    #[test]
    fn test_parse_error_conversion() {
        let parse = toml::from_str::<toml::Table>("= broken").unwrap_err();
        let err: ConfluxError = parse.into();
        assert!(matches!(err, ConfluxError::ConfigParse(_)));
        assert_eq!(err.exit_code(), EXIT_FATAL);
    }
}
