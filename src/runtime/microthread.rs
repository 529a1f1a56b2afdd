//! Microthread records and the public [`MicroThread`] handle.
//!
//! The shared record ([`MicroThreadInner`]) is owned jointly by the
//! scheduler's registry (while live), queued entries, wakers and handles.
//! It only points back at the scheduler weakly.

use super::scheduler::Shared;
use crate::error::{Error, Result};
use crate::observability::MicroThreadInfo;
use crate::types::{
    MicroThreadFlags, MicroThreadId, MicroThreadState, Priority, ProfilingKey, ScheduleMode,
};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

pub(crate) type Computation = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

type WakerSlots = SmallVec<[(u64, Waker); 2]>;

/// Mutable lifecycle state, guarded by [`MicroThreadInner::core`].
pub(crate) struct ThreadCore {
    pub(crate) state: MicroThreadState,
    /// An entry for this microthread sits in the ready queue, the injector
    /// or the next-frame list.
    pub(crate) queued: bool,
    /// The computation is being polled somewhere up the stack.
    pub(crate) polling: bool,
    /// Woken by itself during its own turn: poll again before returning.
    pub(crate) repoll: bool,
    /// The computation asked to continue in a fresh microthread.
    pub(crate) switch_requested: bool,
    /// Microthread this one continued into after a switch.
    pub(crate) switched_to: Option<Arc<MicroThreadInner>>,
    /// Microthread this one continues for; completes with our result.
    pub(crate) forward_to: Option<Arc<MicroThreadInner>>,
    pub(crate) result: Option<Result<()>>,
    pub(crate) completion_order: u64,
    /// Live join futures. A faulted microthread with observers reports its
    /// failure to them instead of the scheduler.
    pub(crate) observers: usize,
    pub(crate) joiners: WakerSlots,
    pub(crate) cancel_waiters: WakerSlots,
    next_slot: u64,
}

impl ThreadCore {
    fn new() -> Self {
        Self {
            state: MicroThreadState::NotStarted,
            queued: false,
            polling: false,
            repoll: false,
            switch_requested: false,
            switched_to: None,
            forward_to: None,
            result: None,
            completion_order: 0,
            observers: 0,
            joiners: SmallVec::new(),
            cancel_waiters: SmallVec::new(),
            next_slot: 0,
        }
    }

    pub(crate) fn next_slot(&mut self) -> u64 {
        self.next_slot += 1;
        self.next_slot
    }
}

/// Registers or refreshes `waker` under `slot` in a waker list.
pub(crate) fn register_slot(slots: &mut WakerSlots, slot: u64, waker: &Waker) {
    if let Some((_, existing)) = slots.iter_mut().find(|(id, _)| *id == slot) {
        if !existing.will_wake(waker) {
            existing.clone_from(waker);
        }
    } else {
        slots.push((slot, waker.clone()));
    }
}

pub(crate) fn remove_slot(slots: &mut WakerSlots, slot: u64) {
    slots.retain(|(id, _)| *id != slot);
}

pub(crate) struct MicroThreadInner {
    pub(crate) id: MicroThreadId,
    pub(crate) scheduler: Weak<Shared>,
    pub(crate) flags: MicroThreadFlags,
    priority: AtomicI64,
    schedule_mode: AtomicU8,
    cancel_requested: AtomicBool,
    tag: Mutex<Option<ProfilingKey>>,
    pub(crate) core: Mutex<ThreadCore>,
    pub(crate) computation: Mutex<Option<Computation>>,
    pub(crate) locals: Mutex<HashMap<usize, Box<dyn Any + Send>>>,
}

impl MicroThreadInner {
    pub(crate) fn new(
        scheduler: Weak<Shared>,
        priority: Priority,
        flags: MicroThreadFlags,
        mode: ScheduleMode,
        tag: Option<ProfilingKey>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: MicroThreadId::next(),
            scheduler,
            flags,
            priority: AtomicI64::new(priority),
            schedule_mode: AtomicU8::new(mode.to_u8()),
            cancel_requested: AtomicBool::new(false),
            tag: Mutex::new(tag),
            core: Mutex::new(ThreadCore::new()),
            computation: Mutex::new(None),
            locals: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn priority(&self) -> Priority {
        self.priority.load(Ordering::Acquire)
    }

    pub(crate) fn set_priority(&self, priority: Priority) {
        self.priority.store(priority, Ordering::Release);
    }

    pub(crate) fn schedule_mode(&self) -> ScheduleMode {
        ScheduleMode::from_u8(self.schedule_mode.load(Ordering::Acquire))
    }

    pub(crate) fn set_schedule_mode(&self, mode: ScheduleMode) {
        self.schedule_mode.store(mode.to_u8(), Ordering::Release);
    }

    pub(crate) fn tag(&self) -> Option<ProfilingKey> {
        self.tag.lock().clone()
    }

    pub(crate) fn set_tag(&self, tag: Option<ProfilingKey>) {
        *self.tag.lock() = tag;
    }

    pub(crate) fn state(&self) -> MicroThreadState {
        self.core.lock().state
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Sets the cancellation flag, wakes `cancelled()` waiters and forwards
    /// the request along a switch.
    pub(crate) fn request_cancel(&self) {
        let newly = !self.cancel_requested.swap(true, Ordering::AcqRel);
        let (waiters, switched_to, forward_to) = {
            let mut core = self.core.lock();
            (
                std::mem::take(&mut core.cancel_waiters),
                core.switched_to.clone(),
                core.forward_to.clone(),
            )
        };
        tracing::trace!(microthread = %self.id, waiters = waiters.len(), "cancel requested");
        for (_, waker) in waiters {
            waker.wake();
        }
        if !newly {
            return;
        }
        // A switch pair shares one cancellation flag in both directions.
        for linked in [switched_to, forward_to].into_iter().flatten() {
            linked.request_cancel();
        }
    }

    /// Drops all microthread-local values outside the lock.
    pub(crate) fn clear_locals(&self) {
        let values = std::mem::take(&mut *self.locals.lock());
        drop(values);
    }

    pub(crate) fn info(&self) -> MicroThreadInfo {
        MicroThreadInfo {
            id: self.id,
            state: self.state(),
            priority: self.priority(),
            schedule_mode: self.schedule_mode(),
            tag: self.tag(),
            cancel_requested: self.is_cancel_requested(),
        }
    }
}

/// Handle to a microthread.
///
/// Cloning is cheap. Dropping every handle does not stop the microthread;
/// the scheduler keeps it alive until it finishes.
#[derive(Clone)]
pub struct MicroThread {
    pub(crate) inner: Arc<MicroThreadInner>,
}

impl MicroThread {
    pub(crate) fn from_inner(inner: Arc<MicroThreadInner>) -> Self {
        Self { inner }
    }

    /// Returns the microthread's identifier.
    #[must_use]
    pub fn id(&self) -> MicroThreadId {
        self.inner.id
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> MicroThreadState {
        self.inner.state()
    }

    /// Returns true once the microthread reached a terminal state.
    #[must_use]
    pub fn is_over(&self) -> bool {
        self.state().is_terminal()
    }

    /// Returns the priority used for its next enqueue.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.inner.priority()
    }

    /// Changes the priority. Entries already queued keep their priority; the
    /// new value is read the next time the microthread is enqueued.
    pub fn set_priority(&self, priority: Priority) {
        self.inner.set_priority(priority);
    }

    /// Returns the microthread's flags.
    #[must_use]
    pub fn flags(&self) -> MicroThreadFlags {
        self.inner.flags
    }

    /// Returns the mode used when the microthread is woken.
    #[must_use]
    pub fn schedule_mode(&self) -> ScheduleMode {
        self.inner.schedule_mode()
    }

    /// Changes the mode used when the microthread is woken.
    pub fn set_schedule_mode(&self, mode: ScheduleMode) {
        self.inner.set_schedule_mode(mode);
    }

    /// Returns the diagnostic tag.
    #[must_use]
    pub fn tag(&self) -> Option<ProfilingKey> {
        self.inner.tag()
    }

    /// Sets the diagnostic tag.
    pub fn set_tag(&self, tag: impl Into<ProfilingKey>) {
        self.inner.set_tag(Some(tag.into()));
    }

    /// Requests cooperative cancellation.
    ///
    /// Only sets a flag (and wakes [`Cx::cancelled`](crate::Cx::cancelled)
    /// waiters); the computation decides when to honor it by returning a
    /// cancellation error. Idempotent.
    pub fn cancel(&self) {
        self.inner.request_cancel();
    }

    /// Returns true if cancellation was requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.is_cancel_requested()
    }

    /// Returns the final result once terminal.
    #[must_use]
    pub fn result(&self) -> Option<Result<()>> {
        self.inner.core.lock().result.clone()
    }

    /// Returns a future resolving to the microthread's result.
    ///
    /// A live join future marks the microthread's failure as observed: it is
    /// reported to the joiner and not to the scheduler.
    #[must_use]
    pub fn join(&self) -> Join {
        Join::new(Arc::clone(&self.inner))
    }

    /// Posts the microthread as a continuation.
    ///
    /// Returns `false` (and does nothing) if it is already queued.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::ScheduleAfterTerminal`](crate::ErrorKind::ScheduleAfterTerminal)
    /// if the microthread already finished, and an internal error if its
    /// scheduler was dropped.
    pub fn schedule_continuation(&self, mode: ScheduleMode) -> Result<bool> {
        let shared = self
            .inner
            .scheduler
            .upgrade()
            .ok_or_else(|| Error::internal("scheduler dropped").with_microthread(self.id()))?;
        shared.schedule_thread(&self.inner, mode)
    }

    /// Returns a monitoring snapshot of this microthread.
    #[must_use]
    pub fn info(&self) -> MicroThreadInfo {
        self.inner.info()
    }
}

impl PartialEq for MicroThread {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for MicroThread {}

impl fmt::Debug for MicroThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicroThread")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("priority", &self.priority())
            .finish_non_exhaustive()
    }
}

/// Future returned by [`MicroThread::join`].
///
/// Resolves to `Ok(())` on completion, the failure on fault and a
/// cancellation error if the microthread was canceled.
#[must_use = "futures do nothing unless polled"]
pub struct Join {
    thread: Arc<MicroThreadInner>,
    slot: Option<u64>,
    done: bool,
}

impl Join {
    fn new(thread: Arc<MicroThreadInner>) -> Self {
        thread.core.lock().observers += 1;
        Self {
            thread,
            slot: None,
            done: false,
        }
    }

    pub(crate) fn thread(&self) -> &Arc<MicroThreadInner> {
        &self.thread
    }

    /// Returns the microthread being joined.
    #[must_use]
    pub fn microthread(&self) -> MicroThread {
        MicroThread::from_inner(Arc::clone(&self.thread))
    }
}

impl Future for Join {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let mut core = this.thread.core.lock();
        if let Some(result) = &core.result {
            let result = result.clone();
            if let Some(slot) = this.slot.take() {
                remove_slot(&mut core.joiners, slot);
            }
            this.done = true;
            return Poll::Ready(result);
        }
        let slot = match this.slot {
            Some(slot) => slot,
            None => {
                let slot = core.next_slot();
                this.slot = Some(slot);
                slot
            }
        };
        register_slot(&mut core.joiners, slot, cx.waker());
        Poll::Pending
    }
}

impl Drop for Join {
    fn drop(&mut self) {
        let mut core = self.thread.core.lock();
        if let Some(slot) = self.slot.take() {
            remove_slot(&mut core.joiners, slot);
        }
        if !self.done && !core.state.is_terminal() {
            core.observers = core.observers.saturating_sub(1);
        }
    }
}

impl fmt::Debug for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Join")
            .field("microthread", &self.thread.id)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, poll_once};

    fn detached() -> Arc<MicroThreadInner> {
        MicroThreadInner::new(Weak::new(), 0, MicroThreadFlags::NONE, ScheduleMode::Last, None)
    }

    #[test]
    fn join_counts_observers_until_dropped() {
        init_test_logging();
        let thread = detached();
        let handle = MicroThread::from_inner(Arc::clone(&thread));
        let mut join = handle.join();
        assert_eq!(thread.core.lock().observers, 1);
        assert!(poll_once(&mut join).is_pending());
        assert_eq!(thread.core.lock().joiners.len(), 1);
        drop(join);
        assert_eq!(thread.core.lock().observers, 0);
        assert!(thread.core.lock().joiners.is_empty());
    }

    #[test]
    fn join_resolves_with_stored_result() {
        init_test_logging();
        let thread = detached();
        let handle = MicroThread::from_inner(Arc::clone(&thread));
        let mut join = handle.join();
        {
            let mut core = thread.core.lock();
            core.state = MicroThreadState::Faulted;
            core.result = Some(Err(Error::user("bad")));
        }
        match poll_once(&mut join) {
            Poll::Ready(Err(err)) => assert_eq!(err.message(), Some("bad")),
            other => panic!("unexpected poll result: {other:?}"),
        }
        drop(join);
        // A completed join keeps counting as an observer.
        assert_eq!(thread.core.lock().observers, 1);
    }

    #[test]
    fn schedule_continuation_without_scheduler_is_internal_error() {
        let handle = MicroThread::from_inner(detached());
        let err = handle
            .schedule_continuation(ScheduleMode::Last)
            .expect_err("no scheduler");
        assert_eq!(err.kind(), crate::ErrorKind::Internal);
    }

    #[test]
    fn cancel_wakes_waiters_once() {
        let thread = detached();
        let slot = thread.core.lock().next_slot();
        let waker = crate::test_utils::noop_waker();
        register_slot(&mut thread.core.lock().cancel_waiters, slot, &waker);
        let handle = MicroThread::from_inner(Arc::clone(&thread));
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancel_requested());
        assert!(thread.core.lock().cancel_waiters.is_empty());
    }
}
