//! Fan-Out/Fan-In: one concurrent branch per item, results in input order
//!
//! Unlike [`WorkerPool`](crate::WorkerPool) there is no concurrency limit, so
//! this fits a bounded number of independent items of roughly uniform cost.

use crate::gather::settle_all;
use conflux_core_resilience::ResilienceError;
use std::future::Future;
use tracing::{debug, warn};

/// Unbounded fan-out over a collection
///
/// # Example
/// ```
/// use conflux_core_pipeline::FanOutFanIn;
/// use conflux_core_resilience::ResilienceError;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), ResilienceError> {
/// let results = FanOutFanIn::new()
///     .run(vec![1, 2, 3], |n| async move { Ok(n * 10) })
///     .await?;
/// assert_eq!(results, vec![10, 20, 30]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct FanOutFanIn;

impl FanOutFanIn {
    pub fn new() -> Self {
        Self
    }

    /// Run `process_item` for every item concurrently
    ///
    /// Returns one result per item, aligned with the input. Every branch is
    /// driven to completion; if any failed, the first failure to complete is
    /// returned and the successful results are discarded.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, process_item: F) -> Result<Vec<R>, ResilienceError>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, ResilienceError>>,
    {
        let count = items.len();
        let process_item = &process_item;
        let settled = settle_all(items.into_iter().map(process_item)).await;

        if let Some(index) = settled.first_failure {
            warn!(item_index = index, total = count, "fan-out branch failed");
        } else {
            debug!(total = count, "fan-in complete");
        }
        settled.into_result()
    }

    /// Like [`FanOutFanIn::run`], but keep every outcome
    ///
    /// Failures are returned in place instead of short-circuiting.
    pub async fn run_settled<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        process_item: F,
    ) -> Vec<Result<R, ResilienceError>>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, ResilienceError>>,
    {
        let process_item = &process_item;
        settle_all(items.into_iter().map(process_item))
            .await
            .outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_results_follow_input_order() {
        let items: Vec<u64> = (0..10).collect();
        let results = FanOutFanIn::new()
            .run(items, |n| async move {
                // Higher items finish first
                tokio::time::sleep(Duration::from_millis(100 - n * 10)).await;
                Ok(format!("processed item-{n}"))
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 10);
        for (n, result) in results.iter().enumerate() {
            assert_eq!(result, &format!("processed item-{n}"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_branches_run_concurrently() {
        let start = Instant::now();
        let results = FanOutFanIn::new()
            .run((0..50).collect(), |n: u32| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(n)
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 50);
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_wins_and_all_branches_finish() {
        let finished = &AtomicUsize::new(0);
        let result = FanOutFanIn::new()
            .run(vec![1u64, 2, 3, 4], move |n| async move {
                tokio::time::sleep(Duration::from_millis(n * 10)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                match n {
                    2 => Err(ResilienceError::Transient("second".to_string())),
                    3 => Err(ResilienceError::Transient("third".to_string())),
                    _ => Ok(n),
                }
            })
            .await;

        assert_eq!(
            result,
            Err(ResilienceError::Transient("second".to_string()))
        );
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_run_settled_keeps_failures() {
        let outcomes = FanOutFanIn::new()
            .run_settled(vec![1, 2, 3], |n| async move {
                if n % 2 == 0 {
                    Err(ResilienceError::Permanent(format!("even {n}")))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(
            outcomes,
            vec![
                Ok(1),
                Err(ResilienceError::Permanent("even 2".to_string())),
                Ok(3),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_input() {
        let results: Vec<u8> = FanOutFanIn::new()
            .run(Vec::<u8>::new(), |n| async move { Ok(n) })
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
