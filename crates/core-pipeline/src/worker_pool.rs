//! Worker Pool: N concurrent consumers draining a shared channel
//!
//! Work items are submitted to a [`BoundedChannel`]; each worker pulls the
//! next item, runs the pool's handler on it and acknowledges it. Items are
//! not pinned to a particular worker, and completion order across workers is
//! not guaranteed even though channel delivery is FIFO.
//!
//! Shutdown closes the channel instead of enqueuing one marker per worker:
//! every worker drains what is buffered, observes end-of-stream exactly once
//! and stops. [`WorkerPool::shutdown`] returns only after all of them have.
//!
//! # Example
//!
//! ```
//! use conflux_core_pipeline::WorkerPool;
//! use conflux_core_resilience::ResilienceError;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ResilienceError> {
//! let pool = WorkerPool::new(3, 0, |job: u32| async move {
//!     tracing::info!(job, "processing");
//!     Ok(())
//! })?;
//!
//! for job in 0..10 {
//!     pool.submit(job).await?;
//! }
//!
//! let stats = pool.shutdown().await?;
//! assert_eq!(stats.processed, 10);
//! # Ok(())
//! # }
//! ```

use crate::channel::BoundedChannel;
use conflux_core_resilience::{run_cancellable, Admission, CancelToken, ResilienceError};
use futures::future::{BoxFuture, FutureExt};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Handler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<(), ResilienceError>> + Send + Sync>;

/// Per-worker counters
#[derive(Debug, Default)]
struct WorkerCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    running: AtomicBool,
}

/// One pool slot
#[derive(Debug)]
struct WorkerHandle {
    id: usize,
    counters: Arc<WorkerCounters>,
    task: Option<JoinHandle<()>>,
}

/// Pool-wide bookkeeping
#[derive(Debug, Default)]
struct Ledger {
    submitted: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    /// Items accepted (or being accepted) but not yet acknowledged
    pending: AtomicUsize,
    /// Woken when `pending` drops to zero
    idle: Notify,
}

impl Ledger {
    fn settle(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Holds one `pending` slot until the item is in the channel
///
/// A submit that fails or is dropped mid-wait gives its slot back.
struct PendingSlot<'a> {
    ledger: &'a Ledger,
    armed: bool,
}

impl<'a> PendingSlot<'a> {
    fn reserve(ledger: &'a Ledger) -> Self {
        ledger.pending.fetch_add(1, Ordering::SeqCst);
        Self {
            ledger,
            armed: true,
        }
    }

    fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.ledger.settle();
        }
    }
}

/// Snapshot of one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub id: usize,
    pub processed: u64,
    pub failed: u64,
    pub running: bool,
}

/// Snapshot of the whole pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolStats {
    pub submitted: u64,
    /// Items whose handler succeeded
    pub processed: u64,
    /// Items whose handler failed or panicked
    pub failed: u64,
    /// Items dropped by [`WorkerPool::abort`]
    pub cancelled: u64,
    /// Items submitted but not yet acknowledged
    pub pending: usize,
    pub workers: Vec<WorkerStats>,
}

/// Configures and starts a [`WorkerPool`]
pub struct WorkerPoolBuilder {
    worker_count: usize,
    capacity: usize,
    admission: Option<Arc<dyn Admission>>,
}

impl WorkerPoolBuilder {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            capacity: 0,
            admission: None,
        }
    }

    /// Queue capacity; zero (the default) means unbounded
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Throttle item execution through an admission controller
    ///
    /// Each worker acquires admission before running the handler.
    pub fn admission(mut self, admission: Arc<dyn Admission>) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Spawn the workers onto the current tokio runtime
    ///
    /// # Errors
    /// `InvalidConfig` if `worker_count` is zero.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn spawn<T, F, Fut>(self, handler: F) -> Result<WorkerPool<T>, ResilienceError>
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ResilienceError>> + Send + 'static,
    {
        if self.worker_count == 0 {
            return Err(ResilienceError::InvalidConfig(
                "worker_count must be > 0".to_string(),
            ));
        }

        let handler: Handler<T> = Arc::new(move |item| handler(item).boxed());
        let channel = BoundedChannel::new(self.capacity);
        let ledger = Arc::new(Ledger::default());
        let cancel = CancelToken::new();

        let workers = (0..self.worker_count)
            .map(|id| {
                let counters = Arc::new(WorkerCounters::default());
                counters.running.store(true, Ordering::SeqCst);

                let task = tokio::spawn(work_loop(
                    id,
                    channel.clone(),
                    Arc::clone(&handler),
                    self.admission.clone(),
                    Arc::clone(&ledger),
                    Arc::clone(&counters),
                    cancel.clone(),
                ));

                WorkerHandle {
                    id,
                    counters,
                    task: Some(task),
                }
            })
            .collect();

        info!(
            workers = self.worker_count,
            capacity = self.capacity,
            throttled = self.admission.is_some(),
            "worker pool started"
        );

        Ok(WorkerPool {
            channel,
            workers,
            ledger,
            cancel,
        })
    }
}

/// Fixed-size pool of workers sharing one channel
///
/// Dropping the pool closes its channel, so workers finish the buffered
/// items and exit on their own.
pub struct WorkerPool<T> {
    channel: BoundedChannel<T>,
    workers: Vec<WorkerHandle>,
    ledger: Arc<Ledger>,
    cancel: CancelToken,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Start `worker_count` workers over a channel of `capacity` (0 = unbounded)
    pub fn new<F, Fut>(worker_count: usize, capacity: usize, handler: F) -> Result<Self, ResilienceError>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ResilienceError>> + Send + 'static,
    {
        WorkerPoolBuilder::new(worker_count)
            .capacity(capacity)
            .spawn(handler)
    }

    pub fn builder(worker_count: usize) -> WorkerPoolBuilder {
        WorkerPoolBuilder::new(worker_count)
    }
}

impl<T> WorkerPool<T> {
    /// Enqueue a work item, waiting while the channel is full
    pub async fn submit(&self, item: T) -> Result<(), ResilienceError> {
        let slot = PendingSlot::reserve(&self.ledger);
        self.channel.put(item).await?;
        slot.commit();
        self.ledger.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Wait until every submitted item has been acknowledged
    ///
    /// The pool stays open; more items may be submitted afterwards.
    pub async fn join(&self) {
        loop {
            let notified = self.ledger.idle.notified();
            if self.ledger.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            submitted: self.ledger.submitted.load(Ordering::Relaxed),
            processed: self.ledger.processed.load(Ordering::Relaxed),
            failed: self.ledger.failed.load(Ordering::Relaxed),
            cancelled: self.ledger.cancelled.load(Ordering::Relaxed),
            pending: self.ledger.pending.load(Ordering::SeqCst),
            workers: self
                .workers
                .iter()
                .map(|worker| WorkerStats {
                    id: worker.id,
                    processed: worker.counters.processed.load(Ordering::Relaxed),
                    failed: worker.counters.failed.load(Ordering::Relaxed),
                    running: worker.counters.running.load(Ordering::SeqCst),
                })
                .collect(),
        }
    }

    /// Stop accepting work, let workers drain the queue, wait for all to stop
    pub async fn shutdown(mut self) -> Result<WorkerPoolStats, ResilienceError> {
        info!(workers = self.workers.len(), "shutting down worker pool");
        self.channel.close();
        self.wait_for_workers().await
    }

    /// Cancel in-flight and queued items, then wait for all workers to stop
    ///
    /// Each cancelled item has its future dropped before the worker moves on.
    pub async fn abort(mut self) -> Result<WorkerPoolStats, ResilienceError> {
        warn!(
            workers = self.workers.len(),
            pending = self.ledger.pending.load(Ordering::SeqCst),
            "aborting worker pool"
        );
        self.cancel.cancel();
        self.channel.close();
        self.wait_for_workers().await
    }

    async fn wait_for_workers(&mut self) -> Result<WorkerPoolStats, ResilienceError> {
        let mut first_error = None;
        for worker in &mut self.workers {
            let Some(task) = worker.task.take() else {
                continue;
            };
            if let Err(join_err) = task.await {
                worker.counters.running.store(false, Ordering::SeqCst);
                first_error.get_or_insert(ResilienceError::TaskPanicked(format!(
                    "worker {} exited abnormally: {}",
                    worker.id, join_err
                )));
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(self.stats()),
        }
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.channel.close();
    }
}

async fn work_loop<T>(
    id: usize,
    channel: BoundedChannel<T>,
    handler: Handler<T>,
    admission: Option<Arc<dyn Admission>>,
    ledger: Arc<Ledger>,
    counters: Arc<WorkerCounters>,
    cancel: CancelToken,
) {
    debug!(worker_id = id, "worker started");

    while let Some(item) = channel.get().await {
        let work = async {
            if let Some(admission) = &admission {
                admission.acquire().await;
            }
            handler(item).await
        };
        let guarded = AssertUnwindSafe(work).catch_unwind().map(|caught| {
            caught.unwrap_or_else(|payload| Err(ResilienceError::TaskPanicked(panic_message(payload))))
        });

        let outcome = run_cancellable(&cancel, guarded, || async move {
            debug!(worker_id = id, "in-flight item cancelled");
        })
        .await;

        match outcome {
            Ok(()) => {
                counters.processed.fetch_add(1, Ordering::Relaxed);
                ledger.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(ResilienceError::Cancelled) => {
                ledger.cancelled.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                warn!(worker_id = id, error = %err, "work item failed");
                counters.failed.fetch_add(1, Ordering::Relaxed);
                ledger.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        ledger.settle();
    }

    counters.running.store(false, Ordering::SeqCst);
    debug!(worker_id = id, "worker stopped");
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core_resilience::RateLimiter;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_every_item() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);

        let pool = WorkerPool::new(3, 0, move |item: u32| {
            let seen = Arc::clone(&seen_in);
            async move {
                tokio::time::sleep(Duration::from_millis(10 * (item as u64 % 4))).await;
                seen.lock().unwrap().push(item);
                Ok(())
            }
        })
        .unwrap();

        for item in 0..10 {
            pool.submit(item).await.unwrap();
        }
        let stats = pool.shutdown().await.unwrap();

        let seen = seen.lock().unwrap();
        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(seen.len(), 10, "no item processed twice");
        assert_eq!(unique, (0..10).collect::<HashSet<_>>());

        assert_eq!(stats.submitted, 10);
        assert_eq!(stats.processed, 10);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.workers.len(), 3);
        assert!(stats.workers.iter().all(|w| !w.running));
        assert_eq!(stats.workers.iter().map(|w| w.processed).sum::<u64>(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_keeps_pool_open() {
        let done = Arc::new(AtomicUsize::new(0));
        let done_in = Arc::clone(&done);

        let pool = WorkerPool::new(2, 4, move |_: ()| {
            let done = Arc::clone(&done_in);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();

        for _ in 0..4 {
            pool.submit(()).await.unwrap();
        }
        pool.join().await;
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert!(pool.stats().workers.iter().all(|w| w.running));

        pool.submit(()).await.unwrap();
        pool.join().await;
        assert_eq!(done.load(Ordering::SeqCst), 5);

        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_join_on_idle_pool_returns() {
        let pool = WorkerPool::new(1, 0, |_: u8| async { Ok(()) }).unwrap();
        pool.join().await;
        assert_eq!(pool.stats().pending, 0);
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_counted() {
        let pool = WorkerPool::new(2, 0, |item: u32| async move {
            match item {
                3 => Err(ResilienceError::Permanent("bad input".to_string())),
                5 => panic!("boom on {item}"),
                _ => Ok(()),
            }
        })
        .unwrap();

        for item in 0..8 {
            pool.submit(item).await.unwrap();
        }
        let stats = pool.shutdown().await.unwrap();

        assert_eq!(stats.processed, 6);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.workers.iter().map(|w| w.failed).sum::<u64>(), 2);
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42u8)), "handler panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_cancels_in_flight_work() {
        let finished = Arc::new(AtomicUsize::new(0));
        let finished_in = Arc::clone(&finished);

        let pool = WorkerPool::new(2, 0, move |_: u32| {
            let finished = Arc::clone(&finished_in);
            async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();

        for item in 0..5 {
            pool.submit(item).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let start = Instant::now();
        let stats = pool.abort().await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert_eq!(stats.cancelled, 5);
        assert_eq!(stats.pending, 0);
        assert!(stats.workers.iter().all(|w| !w.running));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_throttles_workers() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1)).unwrap();
        let pool = WorkerPool::<u32>::builder(3)
            .admission(Arc::new(limiter))
            .spawn(|_: u32| async { Ok(()) })
            .unwrap();

        let start = Instant::now();
        for item in 0..6 {
            pool.submit(item).await.unwrap();
        }
        pool.join().await;

        // Two immediate, four more at 0.5s apiece
        assert!(start.elapsed() >= Duration::from_millis(1990));
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bounded_queue_applies_backpressure() {
        let gate = Arc::new(Notify::new());
        let gate_in = Arc::clone(&gate);

        let pool = WorkerPool::new(1, 1, move |_: u32| {
            let gate = Arc::clone(&gate_in);
            async move {
                gate.notified().await;
                Ok(())
            }
        })
        .unwrap();

        // First item is taken by the worker, second fills the queue
        pool.submit(0).await.unwrap();
        tokio::task::yield_now().await;
        pool.submit(1).await.unwrap();

        let mut third = tokio_test::task::spawn(pool.submit(2));
        tokio_test::assert_pending!(third.poll());
        drop(third);

        // A dropped submit gives back its pending slot
        assert_eq!(pool.stats().pending, 2);

        gate.notify_one();
        gate.notify_one();
        pool.join().await;
        assert_eq!(pool.stats().processed, 2);
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let result = WorkerPool::new(0, 0, |_: u8| async { Ok(()) });
        assert!(matches!(result, Err(ResilienceError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_dropped_pool_releases_workers() {
        let pool = WorkerPool::new(2, 0, |_: u8| async { Ok(()) }).unwrap();
        let channel = pool.channel.clone();
        drop(pool);
        assert!(channel.is_closed());
    }
}
