//! One-shot completion sources.
//!
//! A [`CompletionSource`] is resolved (or canceled) exactly once by a
//! producer; any number of [`Completion`] futures read the outcome. The
//! producer learns whether anybody was still listening, which lets hand-off
//! primitives skip readers that gave up.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use thiserror::Error;

/// Error returned by a wait whose source was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The waiter was removed without a result.
    #[error("wait canceled")]
    Canceled,
}

impl From<WaitError> for crate::Error {
    fn from(err: WaitError) -> Self {
        Self::cancelled().with_message(err.to_string()).with_source(err)
    }
}

enum SourceState<T> {
    Pending {
        wakers: SmallVec<[(u64, Waker); 1]>,
        next_slot: u64,
    },
    Resolved(T),
    Canceled,
}

struct SourceShared<T> {
    state: Mutex<SourceState<T>>,
    /// Live readers: attached `Completion`s not yet resolved or dropped.
    readers: Mutex<usize>,
}

/// Producer side of a one-shot completion.
///
/// Cloning yields another handle to the same completion.
pub struct CompletionSource<T> {
    shared: Arc<SourceShared<T>>,
}

impl<T> Clone for CompletionSource<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> CompletionSource<T> {
    /// Creates a pending source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SourceShared {
                state: Mutex::new(SourceState::Pending {
                    wakers: SmallVec::new(),
                    next_slot: 0,
                }),
                readers: Mutex::new(0),
            }),
        }
    }

    /// Returns a future reading the outcome.
    pub fn completion(&self) -> Completion<T> {
        *self.shared.readers.lock() += 1;
        Completion {
            shared: Arc::clone(&self.shared),
            slot: None,
            attached: true,
        }
    }

    /// Resolves the source with `value`.
    ///
    /// Returns `true` only if the source was pending and at least one reader
    /// was still attached. A source resolved without readers stays resolved.
    pub fn try_set_result(&self, value: T) -> bool {
        self.complete(SourceState::Resolved(value))
    }

    /// Cancels the source. Returns `true` if it was pending with readers.
    pub fn try_cancel(&self) -> bool {
        self.complete(SourceState::Canceled)
    }

    fn complete(&self, outcome: SourceState<T>) -> bool {
        // Reader count is sampled while the state lock is held so a reader
        // detaching concurrently is either counted or sees the outcome.
        let (wakers, delivered) = {
            let mut state = self.shared.state.lock();
            let SourceState::Pending { wakers, .. } = &mut *state else {
                return false;
            };
            let wakers = std::mem::take(wakers);
            *state = outcome;
            (wakers, *self.shared.readers.lock() > 0)
        };
        for (_, waker) in wakers {
            waker.wake();
        }
        delivered
    }

    /// Returns true once resolved or canceled.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        !matches!(*self.shared.state.lock(), SourceState::Pending { .. })
    }

    /// Returns true if resolved with a value.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(*self.shared.state.lock(), SourceState::Resolved(_))
    }
}

impl<T> Default for CompletionSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CompletionSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.shared.state.lock() {
            SourceState::Pending { .. } => "pending",
            SourceState::Resolved(_) => "resolved",
            SourceState::Canceled => "canceled",
        };
        f.debug_struct("CompletionSource")
            .field("state", &state)
            .finish()
    }
}

/// Reader future of a [`CompletionSource`].
#[must_use = "futures do nothing unless polled"]
pub struct Completion<T> {
    shared: Arc<SourceShared<T>>,
    slot: Option<u64>,
    attached: bool,
}

impl<T: Clone> Completion<T> {
    /// Detaches from the source and returns its outcome if already known.
    ///
    /// Once detached the reader no longer counts as a listener.
    pub(crate) fn detach(&mut self) -> Option<Result<T, WaitError>> {
        let mut state = self.shared.state.lock();
        if self.attached {
            self.attached = false;
            let mut readers = self.shared.readers.lock();
            *readers = readers.saturating_sub(1);
        }
        match &mut *state {
            SourceState::Pending { wakers, .. } => {
                if let Some(slot) = self.slot.take() {
                    wakers.retain(|(id, _)| *id != slot);
                }
                None
            }
            SourceState::Resolved(value) => Some(Ok(value.clone())),
            SourceState::Canceled => Some(Err(WaitError::Canceled)),
        }
    }
}

impl<T: Clone> Future for Completion<T> {
    type Output = Result<T, WaitError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let mut state = this.shared.state.lock();
        match &mut *state {
            SourceState::Pending { wakers, next_slot } => {
                let slot = *this.slot.get_or_insert_with(|| {
                    *next_slot += 1;
                    *next_slot
                });
                if let Some((_, existing)) = wakers.iter_mut().find(|(id, _)| *id == slot) {
                    if !existing.will_wake(cx.waker()) {
                        existing.clone_from(cx.waker());
                    }
                } else {
                    wakers.push((slot, cx.waker().clone()));
                }
                Poll::Pending
            }
            SourceState::Resolved(value) => Poll::Ready(Ok(value.clone())),
            SourceState::Canceled => Poll::Ready(Err(WaitError::Canceled)),
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if self.attached {
            let mut readers = self.shared.readers.lock();
            *readers = readers.saturating_sub(1);
        }
        if let (Some(slot), SourceState::Pending { wakers, .. }) = (self.slot, &mut *state) {
            wakers.retain(|(id, _)| *id != slot);
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("attached", &self.attached)
            .finish_non_exhaustive()
    }
}
