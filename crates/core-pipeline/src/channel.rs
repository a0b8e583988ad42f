//! Bounded Channel: FIFO hand-off between producers and consumers
//!
//! A producer that finds the channel full is suspended until a consumer makes
//! room, which is how backpressure reaches the upstream side. Termination is
//! an explicit [`BoundedChannel::close`] rather than a marker item:
//!
//! - blocked and future `put` calls fail with [`ResilienceError::ChannelClosed`]
//! - consumers keep draining what is already buffered
//! - once drained, every `get` returns `None`, for every consumer
//!
//! # Example
//!
//! ```
//! use conflux_core_pipeline::BoundedChannel;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let channel = BoundedChannel::new(2);
//! let producer = channel.clone();
//!
//! tokio::spawn(async move {
//!     for i in 0..5 {
//!         producer.put(i).await.unwrap();
//!     }
//!     producer.close();
//! });
//!
//! let mut received = Vec::new();
//! while let Some(item) = channel.get().await {
//!     received.push(item);
//! }
//! assert_eq!(received, vec![0, 1, 2, 3, 4]);
//! # }
//! ```

use conflux_core_resilience::ResilienceError;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;

/// Error returned by [`BoundedChannel::try_put`]; hands the item back
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TryPutError<T> {
    #[error("channel is full")]
    Full(T),

    #[error("channel is closed")]
    Closed(T),
}

impl<T> TryPutError<T> {
    /// Recover the item that could not be enqueued
    pub fn into_inner(self) -> T {
        match self {
            TryPutError::Full(item) | TryPutError::Closed(item) => item,
        }
    }
}

struct Buffer<T> {
    items: VecDeque<T>,
    closed: bool,
}

struct Shared<T> {
    buffer: Mutex<Buffer<T>>,
    /// Woken when a slot frees up or the channel closes
    not_full: Notify,
    /// Woken when an item arrives or the channel closes
    not_empty: Notify,
    /// Zero means unbounded
    capacity: usize,
}

/// Multi-producer, multi-consumer FIFO with a capacity limit
///
/// Cloning yields another handle to the same channel.
pub struct BoundedChannel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BoundedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for BoundedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buffer = self.lock();
        f.debug_struct("BoundedChannel")
            .field("capacity", &self.shared.capacity)
            .field("len", &buffer.items.len())
            .field("closed", &buffer.closed)
            .finish()
    }
}

impl<T> BoundedChannel<T> {
    /// Create a channel holding at most `capacity` items
    ///
    /// A capacity of zero creates an unbounded channel.
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                buffer: Mutex::new(Buffer {
                    items: VecDeque::new(),
                    closed: false,
                }),
                not_full: Notify::new(),
                not_empty: Notify::new(),
                capacity,
            }),
        }
    }

    /// Create a channel without a capacity limit
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    fn lock(&self) -> MutexGuard<'_, Buffer<T>> {
        // Buffer operations cannot leave it half-updated; keep going after a poison.
        self.shared
            .buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn has_room(&self, buffer: &Buffer<T>) -> bool {
        self.shared.capacity == 0 || buffer.items.len() < self.shared.capacity
    }

    /// Enqueue an item, waiting while the channel is full
    ///
    /// # Errors
    /// `ChannelClosed` if the channel is closed before the item is accepted;
    /// the item is dropped in that case.
    pub async fn put(&self, item: T) -> Result<(), ResilienceError> {
        loop {
            let notified = self.shared.not_full.notified();
            {
                let mut buffer = self.lock();
                if buffer.closed {
                    return Err(ResilienceError::ChannelClosed);
                }
                if self.has_room(&buffer) {
                    buffer.items.push_back(item);
                    drop(buffer);
                    self.shared.not_empty.notify_one();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Enqueue an item only if there is room right now
    pub fn try_put(&self, item: T) -> Result<(), TryPutError<T>> {
        let mut buffer = self.lock();
        if buffer.closed {
            return Err(TryPutError::Closed(item));
        }
        if !self.has_room(&buffer) {
            return Err(TryPutError::Full(item));
        }
        buffer.items.push_back(item);
        drop(buffer);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue the oldest item, waiting while the channel is empty
    ///
    /// Returns `None` once the channel is closed and fully drained.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.shared.not_empty.notified();
            {
                let mut buffer = self.lock();
                if let Some(item) = buffer.items.pop_front() {
                    drop(buffer);
                    self.shared.not_full.notify_one();
                    return Some(item);
                }
                if buffer.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Dequeue the oldest item without waiting
    pub fn try_get(&self) -> Option<T> {
        let item = self.lock().items.pop_front();
        if item.is_some() {
            self.shared.not_full.notify_one();
        }
        item
    }

    /// Signal end-of-stream to every consumer
    ///
    /// Idempotent. Items already buffered remain available to `get`.
    pub fn close(&self) {
        let mut buffer = self.lock();
        if buffer.closed {
            return;
        }
        buffer.closed = true;
        let remaining = buffer.items.len();
        drop(buffer);

        debug!(remaining, "channel closed");
        self.shared.not_empty.notify_waiters();
        self.shared.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Configured capacity, `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        (self.shared.capacity != 0).then_some(self.shared.capacity)
    }
}
