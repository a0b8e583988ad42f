//! Scatter-Gather: partition, process concurrently, reduce in order
//!
//! The input is split into contiguous partitions, every partition is
//! processed concurrently, and the partition results are folded in
//! partition-index order regardless of which finished first.
//!
//! If a partition fails, the remaining partitions still run to completion,
//! their results are discarded, and the first failure to complete is
//! returned.

use crate::gather::settle_all;
use conflux_core_resilience::ResilienceError;
use std::future::Future;
use tracing::{debug, warn};

/// Output of one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionResult<R> {
    /// Position of the partition in the input
    pub chunk_index: usize,
    pub value: R,
}

/// Split `items` into `chunk_count` contiguous partitions
///
/// Each partition holds `len / chunk_count` items and the last one absorbs
/// the remainder. When there are fewer items than partitions, one partition
/// per item is produced. Empty input yields a single empty partition so the
/// reduce step always has something to fold.
///
/// # Errors
/// `InvalidConfig` if `chunk_count` is zero.
///
/// # Example
/// ```
/// use conflux_core_pipeline::scatter_gather::partition;
///
/// let chunks = partition((1..=7).collect::<Vec<_>>(), 3).unwrap();
/// assert_eq!(chunks, vec![vec![1, 2], vec![3, 4], vec![5, 6, 7]]);
/// ```
pub fn partition<T>(items: Vec<T>, chunk_count: usize) -> Result<Vec<Vec<T>>, ResilienceError> {
    if chunk_count == 0 {
        return Err(ResilienceError::InvalidConfig(
            "chunk_count must be > 0".to_string(),
        ));
    }
    if items.is_empty() {
        return Ok(vec![Vec::new()]);
    }

    let chunk_count = chunk_count.min(items.len());
    let chunk_size = items.len() / chunk_count;

    let mut chunks = Vec::with_capacity(chunk_count);
    let mut rest = items.into_iter();
    for _ in 0..chunk_count - 1 {
        chunks.push(rest.by_ref().take(chunk_size).collect());
    }
    chunks.push(rest.collect());
    Ok(chunks)
}

/// Partitioned map-reduce over a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatterGather {
    chunk_count: usize,
}

impl ScatterGather {
    /// # Errors
    /// `InvalidConfig` if `chunk_count` is zero.
    pub fn new(chunk_count: usize) -> Result<Self, ResilienceError> {
        if chunk_count == 0 {
            return Err(ResilienceError::InvalidConfig(
                "chunk_count must be > 0".to_string(),
            ));
        }
        Ok(Self { chunk_count })
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Process every partition concurrently and return the results by index
    pub async fn map_partitions<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        process_chunk: F,
    ) -> Result<Vec<PartitionResult<R>>, ResilienceError>
    where
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = Result<R, ResilienceError>>,
    {
        let chunks = partition(items, self.chunk_count)?;
        debug!(partitions = chunks.len(), "scattering work");

        let process_chunk = &process_chunk;
        let settled = settle_all(chunks.into_iter().map(process_chunk)).await;

        if let Some(index) = settled.first_failure {
            warn!(chunk_index = index, "partition failed; discarding other results");
        }

        Ok(settled
            .into_result()?
            .into_iter()
            .enumerate()
            .map(|(chunk_index, value)| PartitionResult { chunk_index, value })
            .collect())
    }

    /// Scatter `items`, then fold partition results with `combine`
    ///
    /// # Example
    /// ```
    /// use conflux_core_pipeline::ScatterGather;
    /// use conflux_core_resilience::ResilienceError;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> Result<(), ResilienceError> {
    /// let sg = ScatterGather::new(5)?;
    /// let total = sg
    ///     .run(
    ///         (1..=100u64).collect(),
    ///         |chunk| async move { Ok(chunk.iter().sum::<u64>()) },
    ///         0u64,
    ///         |acc, partial| acc + partial,
    ///     )
    ///     .await?;
    /// assert_eq!(total, 5050);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run<T, R, A, F, Fut, C>(
        &self,
        items: Vec<T>,
        process_chunk: F,
        init: A,
        combine: C,
    ) -> Result<A, ResilienceError>
    where
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = Result<R, ResilienceError>>,
        C: FnMut(A, R) -> A,
    {
        let partitions = self.map_partitions(items, process_chunk).await?;
        Ok(partitions
            .into_iter()
            .map(|partition| partition.value)
            .fold(init, combine))
    }
}
