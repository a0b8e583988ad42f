//! Conflux Core Pipeline: Work distribution patterns
//!
//! # Overview
//!
//! Shapes for moving many units of work through a process:
//!
//! - **Bounded Channel**: FIFO hand-off with backpressure and explicit close
//! - **Worker Pool**: Fixed number of consumers draining a shared channel
//! - **Scatter-Gather**: Partition, process concurrently, reduce in order
//! - **Fan-Out/Fan-In**: One concurrent branch per item, results in input order
//!
//! Failures use [`ResilienceError`](conflux_core_resilience::ResilienceError)
//! so work wrapped by a breaker or retry executor flows through unchanged.
//!
//! # Architecture
//!
//! ```text
//!   producers ──put──▶ ┌──────────────────┐ ──get──▶ worker 0 ─┐
//!                      │  BoundedChannel  │ ──get──▶ worker 1 ─┼─▶ ack
//!   close() ─────────▶ └──────────────────┘ ──get──▶ worker N ─┘
//!
//!   items ──partition──▶ [chunk 0] [chunk 1] … ──concurrent──▶ fold by index
//! ```

mod gather;

pub mod channel;
pub mod fan_out;
pub mod scatter_gather;
pub mod worker_pool;

pub use channel::{BoundedChannel, TryPutError};
pub use fan_out::FanOutFanIn;
pub use scatter_gather::{partition, PartitionResult, ScatterGather};
pub use worker_pool::{WorkerPool, WorkerPoolBuilder, WorkerPoolStats, WorkerStats};

/// Prelude module for convenient imports
pub mod prelude {
    pub use super::channel::BoundedChannel;
    pub use super::fan_out::FanOutFanIn;
    pub use super::scatter_gather::ScatterGather;
    pub use super::worker_pool::WorkerPool;
}
