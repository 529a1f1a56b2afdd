//! The microthread context type.
//!
//! `Cx` is handed to a computation when it is added to a scheduler and stays
//! bound to that microthread. It grants:
//! - Identity (the microthread's id and handle)
//! - Cancellation checks and a future resolving on cancellation
//! - Suspension points that cooperate with the scheduler
//! - Access back to the owning scheduler
//!
//! # Thread Safety
//!
//! `Cx` is `Send + Sync` and cheap to clone, but the suspension helpers only
//! work when awaited during the owning microthread's turn; awaited anywhere
//! else they resolve with
//! [`ErrorKind::NotInMicroThread`](crate::ErrorKind::NotInMicroThread).

use crate::error::{Error, Result};
use crate::runtime::microthread::{MicroThread, MicroThreadInner, register_slot, remove_slot};
use crate::runtime::switch::SwitchToNew;
use crate::runtime::yield_now::{NextFrame, YieldNow};
use crate::runtime::Scheduler;
use crate::types::{MicroThreadFlags, MicroThreadId, Priority, ScheduleMode};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// The context of one microthread.
///
/// # Example
///
/// ```ignore
/// scheduler.add(|cx| async move {
///     for item in work {
///         cx.checkpoint()?;
///         process(item);
///         cx.yield_now().await?;
///     }
///     Ok(())
/// });
/// ```
#[derive(Clone)]
pub struct Cx {
    inner: Arc<MicroThreadInner>,
}

impl Cx {
    pub(crate) fn new(inner: Arc<MicroThreadInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<MicroThreadInner> {
        &self.inner
    }

    /// Returns the microthread's id.
    #[must_use]
    pub fn id(&self) -> MicroThreadId {
        self.inner.id
    }

    /// Returns a handle to the microthread.
    #[must_use]
    pub fn microthread(&self) -> MicroThread {
        MicroThread::from_inner(Arc::clone(&self.inner))
    }

    /// Returns the owning scheduler, or `None` once it was dropped.
    #[must_use]
    pub fn scheduler(&self) -> Option<Scheduler> {
        self.inner.scheduler.upgrade().map(Scheduler::from_shared)
    }

    /// Returns true if this microthread is being polled on the calling thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.inner
            .scheduler
            .upgrade()
            .is_some_and(|shared| shared.is_current(self.inner.id))
    }

    /// Returns the microthread's priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.inner.priority()
    }

    /// Changes the priority used for the next enqueue.
    pub fn set_priority(&self, priority: Priority) {
        self.inner.set_priority(priority);
    }

    /// Changes the mode used when this microthread is woken.
    pub fn set_schedule_mode(&self, mode: ScheduleMode) {
        self.inner.set_schedule_mode(mode);
    }

    /// Returns true if cancellation has been requested.
    ///
    /// Non-blocking; unlike [`checkpoint`](Self::checkpoint) it does not turn
    /// the request into an error.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.is_cancel_requested()
    }

    /// Checks for cancellation and returns an error if cancelled.
    ///
    /// Returning that error from the computation finishes the microthread as
    /// [`Canceled`](crate::MicroThreadState::Canceled).
    ///
    /// # Errors
    ///
    /// [`ErrorKind::Cancelled`](crate::ErrorKind::Cancelled) if cancellation
    /// is pending.
    pub fn checkpoint(&self) -> Result<()> {
        if self.inner.is_cancel_requested() {
            Err(Error::cancelled().with_microthread(self.inner.id))
        } else {
            Ok(())
        }
    }

    /// Returns a future resolving once cancellation is requested.
    pub fn cancelled(&self) -> Cancelled {
        Cancelled {
            thread: Arc::clone(&self.inner),
            slot: None,
        }
    }

    /// Gives other ready work a turn.
    ///
    /// See [`YieldNow`] for the exact rules.
    pub fn yield_now(&self) -> YieldNow {
        YieldNow::new(Arc::clone(&self.inner))
    }

    /// Suspends until the scheduler's next outermost run.
    pub fn next_frame(&self) -> NextFrame {
        NextFrame::new(Arc::clone(&self.inner))
    }

    /// Continues the rest of the computation in a new microthread.
    ///
    /// Resolves, inside the new microthread, to a
    /// [`MicroThreadScope`](crate::MicroThreadScope) whose `cx()` must be
    /// used from then on.
    pub fn switch_to_new_microthread(&self) -> SwitchToNew {
        SwitchToNew::new(Arc::clone(&self.inner))
    }

    /// Adds a microthread to the same scheduler, inheriting this one's
    /// priority and flags.
    ///
    /// # Errors
    ///
    /// Internal error if the scheduler was dropped.
    pub fn spawn<F, Fut>(&self, computation: F) -> Result<MicroThread>
    where
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.spawn_with(self.priority(), self.inner.flags, computation)
    }

    /// Adds a microthread to the same scheduler with explicit settings.
    ///
    /// # Errors
    ///
    /// Internal error if the scheduler was dropped.
    pub fn spawn_with<F, Fut>(
        &self,
        priority: Priority,
        flags: MicroThreadFlags,
        computation: F,
    ) -> Result<MicroThread>
    where
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let shared = self
            .inner
            .scheduler
            .upgrade()
            .ok_or_else(|| Error::internal("scheduler dropped").with_microthread(self.inner.id))?;
        Ok(shared.spawn(priority, flags, computation))
    }
}

impl fmt::Debug for Cx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cx")
            .field("microthread", &self.inner.id)
            .field("cancel_requested", &self.is_cancel_requested())
            .finish()
    }
}

/// Future returned by [`Cx::cancelled`].
#[must_use = "futures do nothing unless polled"]
pub struct Cancelled {
    thread: Arc<MicroThreadInner>,
    slot: Option<u64>,
}

impl Future for Cancelled {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let mut core = this.thread.core.lock();
        // Checked under the lock: `request_cancel` sets the flag before
        // taking it, so either we see the flag or it sees our waker.
        if this.thread.is_cancel_requested() {
            if let Some(slot) = this.slot.take() {
                remove_slot(&mut core.cancel_waiters, slot);
            }
            return Poll::Ready(());
        }
        let slot = match this.slot {
            Some(slot) => slot,
            None => {
                let slot = core.next_slot();
                this.slot = Some(slot);
                slot
            }
        };
        register_slot(&mut core.cancel_waiters, slot, cx.waker());
        Poll::Pending
    }
}

impl Drop for Cancelled {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            remove_slot(&mut self.thread.core.lock().cancel_waiters, slot);
        }
    }
}

impl fmt::Debug for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancelled")
            .field("microthread", &self.thread.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, poll_once};
    use crate::ErrorKind;
    use std::sync::Weak;

    fn detached_cx() -> Cx {
        Cx::new(MicroThreadInner::new(
            Weak::new(),
            4,
            MicroThreadFlags::NONE,
            ScheduleMode::Last,
            None,
        ))
    }

    #[test]
    fn checkpoint_reports_cancellation() {
        init_test_logging();
        let cx = detached_cx();
        assert!(cx.checkpoint().is_ok());
        cx.microthread().cancel();
        let err = cx.checkpoint().expect_err("cancelled");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(err.context().microthread, Some(cx.id()));
    }

    #[test]
    fn cancelled_future_resolves_after_cancel() {
        init_test_logging();
        let cx = detached_cx();
        let mut fut = cx.cancelled();
        assert!(poll_once(&mut fut).is_pending());
        assert_eq!(cx.inner().core.lock().cancel_waiters.len(), 1);
        cx.microthread().cancel();
        assert!(poll_once(&mut fut).is_ready());
    }

    #[test]
    fn dropped_cancelled_future_deregisters() {
        let cx = detached_cx();
        let mut fut = cx.cancelled();
        assert!(poll_once(&mut fut).is_pending());
        drop(fut);
        assert!(cx.inner().core.lock().cancel_waiters.is_empty());
    }

    #[test]
    fn helpers_outside_scheduler_fail() {
        init_test_logging();
        let cx = detached_cx();
        assert!(!cx.is_current());
        assert!(cx.scheduler().is_none());
        let mut yielded = cx.yield_now();
        match poll_once(&mut yielded) {
            Poll::Ready(Err(err)) => assert_eq!(err.kind(), ErrorKind::NotInMicroThread),
            other => panic!("unexpected: {other:?}"),
        }
        let spawned = cx.spawn(|_cx| async { Ok(()) });
        assert_eq!(spawned.expect_err("no scheduler").kind(), ErrorKind::Internal);
        assert_eq!(cx.priority(), 4);
    }
}
