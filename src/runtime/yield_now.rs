//! Explicit suspension points: yield to equal-priority work and park until
//! the next frame.

use super::microthread::MicroThreadInner;
use crate::error::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Future returned by [`Cx::yield_now`](crate::Cx::yield_now).
///
/// - Owner already finished: resolves `Ok(())` immediately.
/// - Awaited outside the owner's turn: resolves with
///   [`ErrorKind::NotInMicroThread`](crate::ErrorKind::NotInMicroThread).
/// - Ready queue empty: resolves `Ok(())` without suspending.
/// - Otherwise the owner is re-queued run-last at its priority and the
///   future resolves when it is resumed, re-checking cancellation.
#[must_use = "futures do nothing unless polled"]
pub struct YieldNow {
    thread: Arc<MicroThreadInner>,
    yielded: bool,
}

impl YieldNow {
    pub(crate) fn new(thread: Arc<MicroThreadInner>) -> Self {
        Self {
            thread,
            yielded: false,
        }
    }
}

impl Future for YieldNow {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            return Poll::Ready(if self.thread.is_cancel_requested() {
                Err(Error::cancelled().with_microthread(self.thread.id))
            } else {
                Ok(())
            });
        }
        if self.thread.state().is_terminal() {
            return Poll::Ready(Ok(()));
        }
        let Some(shared) = self.thread.scheduler.upgrade() else {
            return Poll::Ready(Err(Error::not_in_microthread(self.thread.id)));
        };
        if !shared.is_current(self.thread.id) {
            return Poll::Ready(Err(Error::not_in_microthread(self.thread.id)));
        }
        if !shared.has_ready_work() {
            return Poll::Ready(Ok(()));
        }
        shared.requeue_current(&self.thread);
        self.yielded = true;
        Poll::Pending
    }
}

/// Future returned by [`Cx::next_frame`](crate::Cx::next_frame).
///
/// Parks the owner until the start of the next outermost
/// [`Scheduler::run`](crate::Scheduler::run), then resumes it run-last.
/// While parked, other wakeups of the owner are absorbed: it resumes at the
/// next frame at the latest.
#[must_use = "futures do nothing unless polled"]
pub struct NextFrame {
    thread: Arc<MicroThreadInner>,
    parked: bool,
}

impl NextFrame {
    pub(crate) fn new(thread: Arc<MicroThreadInner>) -> Self {
        Self {
            thread,
            parked: false,
        }
    }
}

impl Future for NextFrame {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.parked {
            return Poll::Ready(Ok(()));
        }
        if self.thread.state().is_terminal() {
            return Poll::Ready(Ok(()));
        }
        let Some(shared) = self.thread.scheduler.upgrade() else {
            return Poll::Ready(Err(Error::not_in_microthread(self.thread.id)));
        };
        if !shared.is_current(self.thread.id) {
            return Poll::Ready(Err(Error::not_in_microthread(self.thread.id)));
        }
        shared.park_until_next_frame(&self.thread);
        self.parked = true;
        Poll::Pending
    }
}
