/*!
 * Conflux - async coordination toolkit
 *
 * Building blocks for coordinating concurrent async work:
 * - Token bucket rate limiting
 * - Circuit breaking with half-open recovery
 * - Retries with exponential backoff and jitter
 * - Bounded channels, worker pools, scatter-gather and fan-out/fan-in
 *
 * This crate ties the pieces to one TOML configuration and sets up logging.
 *
 * Version: 0.1.0
 * Author: Shane Wall <shaneawall@gmail.com>
 */

pub mod config;
pub mod error;
pub mod logging;
pub mod toolkit;

// Re-export commonly used types
pub use config::{ConfluxConfig, LogLevel, LoggingConfig};
pub use error::{ConfluxError, Result};
pub use toolkit::Toolkit;

pub use conflux_core_pipeline as pipeline;
pub use conflux_core_resilience as resilience;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
