//! Concurrent join shared by scatter-gather and fan-out

use conflux_core_resilience::ResilienceError;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;

/// Every branch outcome in input order, plus the first failure to complete
pub(crate) struct Settled<R> {
    pub outcomes: Vec<Result<R, ResilienceError>>,
    pub first_failure: Option<usize>,
}

impl<R> Settled<R> {
    /// Collapse into the successful values, or the first failure observed
    pub fn into_result(self) -> Result<Vec<R>, ResilienceError> {
        let Settled {
            outcomes,
            first_failure,
        } = self;

        if let Some(index) = first_failure {
            return match outcomes.into_iter().nth(index) {
                Some(Err(err)) => Err(err),
                _ => Err(ResilienceError::TaskPanicked(format!(
                    "branch {index} recorded as failed without an error"
                ))),
            };
        }
        outcomes.into_iter().collect()
    }
}

/// Drive all futures concurrently on the current task until each finishes
///
/// Nothing is spawned, so branches may borrow from the caller. Dropping the
/// returned future drops every unfinished branch.
pub(crate) async fn settle_all<I, Fut, R>(branches: I) -> Settled<R>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<R, ResilienceError>>,
{
    let mut running: FuturesUnordered<_> = branches
        .into_iter()
        .enumerate()
        .map(|(index, branch)| async move { (index, branch.await) })
        .collect();

    let mut slots: Vec<Option<Result<R, ResilienceError>>> =
        (0..running.len()).map(|_| None).collect();
    let mut first_failure = None;

    while let Some((index, outcome)) = running.next().await {
        if outcome.is_err() && first_failure.is_none() {
            first_failure = Some(index);
        }
        slots[index] = Some(outcome);
    }

    let outcomes = slots
        .into_iter()
        .map(|slot| slot.unwrap_or(Err(ResilienceError::Cancelled)))
        .collect();

    Settled {
        outcomes,
        first_failure,
    }
}
