//! Switching the rest of a computation into a fresh microthread.
//!
//! Awaiting [`SwitchToNew`] suspends the current microthread; the scheduler
//! then moves its computation into a newly created microthread (same
//! priority, flags and schedule mode) and enqueues it run-last. The await
//! resolves inside the new microthread with a [`MicroThreadScope`]. When the
//! new microthread finishes, the original one finishes with the same result.

use super::microthread::{MicroThread, MicroThreadInner};
use crate::cx::Cx;
use crate::error::{Error, Result};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Future returned by
/// [`Cx::switch_to_new_microthread`](crate::Cx::switch_to_new_microthread).
#[must_use = "futures do nothing unless polled"]
pub struct SwitchToNew {
    origin: Arc<MicroThreadInner>,
    requested: bool,
}

impl SwitchToNew {
    pub(crate) fn new(origin: Arc<MicroThreadInner>) -> Self {
        Self {
            origin,
            requested: false,
        }
    }
}

impl Future for SwitchToNew {
    type Output = Result<MicroThreadScope>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(shared) = self.origin.scheduler.upgrade() else {
            return Poll::Ready(Err(Error::not_in_microthread(self.origin.id)));
        };
        if !self.requested {
            if self.origin.state().is_terminal() || !shared.is_current(self.origin.id) {
                return Poll::Ready(Err(Error::not_in_microthread(self.origin.id)));
            }
            self.origin.core.lock().switch_requested = true;
            self.requested = true;
            return Poll::Pending;
        }
        let target = self.origin.core.lock().switched_to.clone();
        match target {
            Some(target) if shared.is_current(target.id) => {
                Poll::Ready(Ok(MicroThreadScope::new(Cx::new(target))))
            }
            Some(target) => Poll::Ready(Err(Error::not_in_microthread(target.id))),
            None => Poll::Ready(Err(Error::internal("switch target missing")
                .with_microthread(self.origin.id))),
        }
    }
}

/// Scope of the microthread a computation switched into.
///
/// Dropping the scope clears that microthread's
/// [`MicroThreadLocal`](crate::MicroThreadLocal) values.
///
/// The original `Cx` stays bound to the original microthread: suspension
/// helpers awaited through it fail with `NotInMicroThread`. Cancellation is
/// shared, so canceling either microthread is seen by `checkpoint` and
/// `cancelled` on both contexts.
pub struct MicroThreadScope {
    cx: Cx,
}

impl MicroThreadScope {
    fn new(cx: Cx) -> Self {
        Self { cx }
    }

    /// Context of the new microthread. Suspension helpers must be awaited
    /// through this context from now on.
    #[must_use]
    pub fn cx(&self) -> &Cx {
        &self.cx
    }

    /// Handle to the new microthread.
    #[must_use]
    pub fn microthread(&self) -> MicroThread {
        self.cx.microthread()
    }
}

impl Drop for MicroThreadScope {
    fn drop(&mut self) {
        self.cx.inner().clear_locals();
    }
}

impl fmt::Debug for MicroThreadScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicroThreadScope")
            .field("microthread", &self.cx.id())
            .finish()
    }
}
