//! Aggregate join over several microthreads.

use super::microthread::Join;
use crate::error::{Error, Result};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future returned by [`Scheduler::when_all`](crate::Scheduler::when_all).
///
/// Resolves `Ok(())` once every microthread is terminal without a fault.
/// As soon as one has faulted it resolves with the failure of the microthread
/// that faulted first; the others are left running. Canceled microthreads
/// count as finished, not failed.
#[must_use = "futures do nothing unless polled"]
pub struct WhenAll {
    joins: Vec<Option<Join>>,
}

impl WhenAll {
    pub(crate) fn new(joins: Vec<Join>) -> Self {
        Self {
            joins: joins.into_iter().map(Some).collect(),
        }
    }

    /// Number of microthreads not yet observed as finished.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.joins.iter().filter(|join| join.is_some()).count()
    }
}

impl Future for WhenAll {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut first_failure: Option<(u64, Error)> = None;
        for slot in &mut self.joins {
            let Some(join) = slot.as_mut() else { continue };
            match Pin::new(&mut *join).poll(cx) {
                Poll::Pending => {}
                Poll::Ready(Ok(())) => *slot = None,
                Poll::Ready(Err(err)) if err.is_cancelled() => *slot = None,
                Poll::Ready(Err(err)) => {
                    let order = join.thread().core.lock().completion_order;
                    if first_failure.as_ref().is_none_or(|(best, _)| order < *best) {
                        first_failure = Some((order, err));
                    }
                    *slot = None;
                }
            }
        }
        if let Some((_, err)) = first_failure {
            return Poll::Ready(Err(err));
        }
        if self.joins.iter().all(Option::is_none) {
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    }
}

impl fmt::Debug for WhenAll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhenAll")
            .field("remaining", &self.remaining())
            .finish()
    }
}
