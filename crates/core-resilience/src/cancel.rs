//! Cooperative cancellation
//!
//! A [`CancelToken`] is a cloneable flag that tasks can await. Work wrapped
//! with [`run_cancellable`] is torn down in a fixed order when the token
//! fires: the in-flight future is dropped first, the caller's async cleanup
//! runs next, and only then does [`ResilienceError::Cancelled`] propagate.

use super::error::ResilienceError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared cancellation signal
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; later calls are no-ops
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            debug!("cancellation requested");
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelToken::cancel`] has been called
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a concurrent cancel cannot slip between.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Run `fut` until it completes or `token` is cancelled
///
/// On cancellation the in-flight future is dropped, `cleanup` is awaited,
/// and `Cancelled` is returned.
pub async fn run_cancellable<Fut, T, C, CFut>(
    token: &CancelToken,
    fut: Fut,
    cleanup: C,
) -> Result<T, ResilienceError>
where
    Fut: Future<Output = Result<T, ResilienceError>>,
    C: FnOnce() -> CFut,
    CFut: Future<Output = ()>,
{
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        result = fut => Some(result),
    };

    match outcome {
        Some(result) => result,
        None => {
            cleanup().await;
            Err(ResilienceError::Cancelled)
        }
    }
}
