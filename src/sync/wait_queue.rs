//! FIFO queue of pending completion sources.
//!
//! [`WaitQueue`] is the building block for higher-level primitives: waiters
//! enqueue themselves and await their [`WaitEntry`]; a releaser removes
//! entries under the queue's lock and resolves them afterwards through the
//! returned [`Release`] handle, so no waiter code ever runs while the lock is
//! held.
//!
//! # Cancel Safety
//!
//! - Dropping a pending `WaitEntry` removes it from the queue.
//! - `try_cancel` of an entry that was already dequeued is a no-op.

use super::completion::{Completion, CompletionSource, WaitError};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

/// Identifies one enqueued waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitToken(u64);

struct Waiter<T> {
    token: WaitToken,
    source: CompletionSource<T>,
}

struct QueueState<T> {
    waiters: VecDeque<Waiter<T>>,
    next_token: u64,
}

type SharedQueue<T> = Arc<Mutex<QueueState<T>>>;

/// FIFO wait queue.
///
/// # Example
///
/// ```ignore
/// let queue = WaitQueue::<u32>::new();
/// let first = queue.enqueue();
/// let second = queue.enqueue();
/// queue.dequeue_all(7).release();
/// assert_eq!(first.await, Ok(7));
/// assert_eq!(second.await, Ok(7));
/// ```
pub struct WaitQueue<T> {
    state: SharedQueue<T>,
}

impl<T: Clone + Send + 'static> WaitQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                waiters: VecDeque::new(),
                next_token: 0,
            })),
        }
    }

    /// Appends a waiter and returns its future.
    pub fn enqueue(&self) -> WaitEntry<T> {
        let source = CompletionSource::new();
        let completion = source.completion();
        let token = {
            let mut state = self.state.lock();
            state.next_token += 1;
            let token = WaitToken(state.next_token);
            state.waiters.push_back(Waiter { token, source });
            token
        };
        WaitEntry {
            token,
            completion,
            queue: Arc::downgrade(&self.state),
            finished: false,
        }
    }

    /// Removes the oldest waiter; it is resolved with `result` on release.
    ///
    /// On an empty queue the returned handle is empty.
    pub fn dequeue(&self, result: T) -> Release<T> {
        let waiter = self.state.lock().waiters.pop_front();
        let mut release = Release::empty();
        if let Some(waiter) = waiter {
            release.actions.push(ReleaseAction::Resolve(waiter.source, result));
        }
        release
    }

    /// Removes every waiter; all are resolved with `result`, in FIFO order,
    /// on release.
    pub fn dequeue_all(&self, result: T) -> Release<T> {
        let waiters = std::mem::take(&mut self.state.lock().waiters);
        let mut release = Release::empty();
        release.actions.extend(
            waiters
                .into_iter()
                .map(|waiter| ReleaseAction::Resolve(waiter.source, result.clone())),
        );
        release
    }

    /// Removes the waiter with `token`, canceling it on release.
    ///
    /// Empty handle if the waiter is no longer queued.
    pub fn try_cancel(&self, token: WaitToken) -> Release<T> {
        let removed = {
            let mut state = self.state.lock();
            state
                .waiters
                .iter()
                .position(|waiter| waiter.token == token)
                .and_then(|pos| state.waiters.remove(pos))
        };
        let mut release = Release::empty();
        if let Some(waiter) = removed {
            release.actions.push(ReleaseAction::Cancel(waiter.source));
        }
        release
    }

    /// Removes every waiter, canceling them on release.
    pub fn cancel_all(&self) -> Release<T> {
        let waiters = std::mem::take(&mut self.state.lock().waiters);
        let mut release = Release::empty();
        release
            .actions
            .extend(waiters.into_iter().map(|waiter| ReleaseAction::Cancel(waiter.source)));
        release
    }

    /// Number of queued waiters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Returns true if nobody is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().waiters.is_empty()
    }
}

impl<T: Clone + Send + 'static> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for WaitQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitQueue")
            .field("len", &self.state.lock().waiters.len())
            .finish()
    }
}

enum ReleaseAction<T> {
    Resolve(CompletionSource<T>, T),
    Cancel(CompletionSource<T>),
}

/// Deferred resolution of removed waiters.
///
/// Resolves (or cancels) its waiters on [`release`](Self::release) or when
/// dropped, always outside the queue's lock.
#[must_use = "removed waiters are only resolved when the release handle is released or dropped"]
pub struct Release<T> {
    actions: SmallVec<[ReleaseAction<T>; 1]>,
}

impl<T> Release<T> {
    fn empty() -> Self {
        Self {
            actions: SmallVec::new(),
        }
    }

    /// Number of waiters this handle will complete.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true if no waiter was removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Completes the removed waiters in FIFO order.
    ///
    /// Returns how many of them still had someone listening.
    pub fn release(mut self) -> usize {
        self.complete_all()
    }

    fn complete_all(&mut self) -> usize {
        let mut delivered = 0;
        for action in self.actions.drain(..) {
            let reached = match action {
                ReleaseAction::Resolve(source, value) => source.try_set_result(value),
                ReleaseAction::Cancel(source) => source.try_cancel(),
            };
            if reached {
                delivered += 1;
            }
        }
        delivered
    }
}

impl<T> Drop for Release<T> {
    fn drop(&mut self) {
        self.complete_all();
    }
}

impl<T> fmt::Debug for Release<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Release")
            .field("pending", &self.actions.len())
            .finish()
    }
}

/// Future of one enqueued waiter.
#[must_use = "futures do nothing unless polled"]
pub struct WaitEntry<T> {
    token: WaitToken,
    completion: Completion<T>,
    queue: Weak<Mutex<QueueState<T>>>,
    finished: bool,
}

impl<T> WaitEntry<T> {
    /// Token for [`WaitQueue::try_cancel`].
    #[must_use]
    pub fn token(&self) -> WaitToken {
        self.token
    }

    fn leave_queue(&self) {
        if let Some(queue) = self.queue.upgrade() {
            let mut state = queue.lock();
            if let Some(pos) = state.waiters.iter().position(|w| w.token == self.token) {
                state.waiters.remove(pos);
            }
        }
    }
}

impl<T: Clone> WaitEntry<T> {
    /// Leaves the queue and stops listening.
    ///
    /// Returns the outcome if the entry had already been completed, so a
    /// hand-off that raced with the abandonment can be passed on.
    pub(crate) fn abandon(&mut self) -> Option<Result<T, WaitError>> {
        self.finished = true;
        self.leave_queue();
        self.completion.detach()
    }
}

impl<T: Clone> Future for WaitEntry<T> {
    type Output = Result<T, WaitError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let polled = Pin::new(&mut self.completion).poll(cx);
        if polled.is_ready() {
            self.finished = true;
        }
        polled
    }
}

impl<T> Drop for WaitEntry<T> {
    fn drop(&mut self) {
        if !self.finished {
            self.leave_queue();
        }
    }
}

impl<T> fmt::Debug for WaitEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitEntry")
            .field("token", &self.token)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, poll_once};

    #[test]
    fn dequeue_all_resolves_in_order_and_empties() {
        init_test_logging();
        crate::test_phase!("dequeue_all_resolves_in_order_and_empties");
        let queue = WaitQueue::<u32>::new();
        let mut entries: Vec<_> = (0..3).map(|_| queue.enqueue()).collect();
        for entry in &mut entries {
            assert!(poll_once(entry).is_pending());
        }
        let release = queue.dequeue_all(5);
        assert!(queue.is_empty());
        assert_eq!(release.len(), 3);
        assert_eq!(release.release(), 3);
        for entry in &mut entries {
            assert_eq!(poll_once(entry), Poll::Ready(Ok(5)));
        }
        crate::test_complete!("dequeue_all_resolves_in_order_and_empties");
    }

    #[test]
    fn dequeue_takes_oldest() {
        init_test_logging();
        let queue = WaitQueue::<&'static str>::new();
        let mut first = queue.enqueue();
        let mut second = queue.enqueue();
        queue.dequeue("a").release();
        assert_eq!(poll_once(&mut first), Poll::Ready(Ok("a")));
        assert!(poll_once(&mut second).is_pending());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn dequeue_on_empty_is_noop() {
        let queue = WaitQueue::<u8>::new();
        let release = queue.dequeue(1);
        assert!(release.is_empty());
        assert_eq!(release.release(), 0);
    }

    #[test]
    fn try_cancel_after_dequeue_is_noop() {
        init_test_logging();
        let queue = WaitQueue::<u8>::new();
        let mut entry = queue.enqueue();
        let token = entry.token();
        queue.dequeue(4).release();
        let cancel = queue.try_cancel(token);
        assert!(cancel.is_empty());
        drop(cancel);
        assert_eq!(poll_once(&mut entry), Poll::Ready(Ok(4)));
    }

    #[test]
    fn try_cancel_cancels_pending_entry() {
        let queue = WaitQueue::<u8>::new();
        let mut keep = queue.enqueue();
        let mut gone = queue.enqueue();
        assert_eq!(queue.try_cancel(gone.token()).release(), 1);
        assert_eq!(poll_once(&mut gone), Poll::Ready(Err(WaitError::Canceled)));
        assert!(poll_once(&mut keep).is_pending());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn cancel_all_cancels_everyone() {
        let queue = WaitQueue::<u8>::new();
        let mut a = queue.enqueue();
        let mut b = queue.enqueue();
        drop(queue.cancel_all());
        assert_eq!(poll_once(&mut a), Poll::Ready(Err(WaitError::Canceled)));
        assert_eq!(poll_once(&mut b), Poll::Ready(Err(WaitError::Canceled)));
    }

    #[test]
    fn dropped_entry_leaves_queue() {
        let queue = WaitQueue::<u8>::new();
        let entry = queue.enqueue();
        assert_eq!(queue.len(), 1);
        drop(entry);
        assert!(queue.is_empty());
    }

    #[test]
    fn release_counts_only_listening_waiters() {
        let queue = WaitQueue::<u8>::new();
        let mut abandoned = queue.enqueue();
        let _listening = queue.enqueue();
        let release = queue.dequeue_all(1);
        assert_eq!(abandoned.abandon(), None);
        assert_eq!(release.release(), 1);
    }

    #[test]
    fn release_handle_resolves_on_drop() {
        let queue = WaitQueue::<u8>::new();
        let mut entry = queue.enqueue();
        {
            let _release = queue.dequeue(8);
            assert!(poll_once(&mut entry).is_pending());
        }
        assert_eq!(poll_once(&mut entry), Poll::Ready(Ok(8)));
    }
}
