//! FIFO hand-off lock for microthreads.
//!
//! Unlocking hands ownership directly to the oldest waiter, so a microthread
//! that keeps relocking cannot starve the others.
//!
//! # Cancel Safety
//!
//! - Dropping a `LockFuture` while waiting: the waiter leaves the queue.
//! - Dropping it after ownership was handed over but before it was polled:
//!   ownership passes to the next waiter.

use super::completion::WaitError;
use super::wait_queue::{WaitEntry, WaitQueue};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;

/// Error returned by [`AsyncLock::try_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryLockError {
    /// The lock is held.
    #[error("lock is held")]
    WouldBlock,
}

/// Asynchronous mutual exclusion without protected data.
///
/// ```ignore
/// let lock = Arc::new(AsyncLock::new());
/// scheduler.add(move |cx| async move {
///     let _guard = lock.lock().await;
///     cx.yield_now().await?;
///     Ok(())
/// });
/// ```
pub struct AsyncLock {
    locked: Mutex<bool>,
    waiters: WaitQueue<()>,
}

impl AsyncLock {
    /// Creates an unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            locked: Mutex::new(false),
            waiters: WaitQueue::new(),
        }
    }

    /// Returns a future resolving to a guard once the lock is owned.
    pub fn lock(&self) -> LockFuture<'_> {
        LockFuture {
            lock: self,
            entry: None,
        }
    }

    /// Takes the lock if it is free.
    ///
    /// # Errors
    ///
    /// [`TryLockError::WouldBlock`] if the lock is held.
    pub fn try_lock(&self) -> Result<AsyncLockGuard<'_>, TryLockError> {
        let mut locked = self.locked.lock();
        if *locked {
            return Err(TryLockError::WouldBlock);
        }
        *locked = true;
        Ok(AsyncLockGuard { lock: self })
    }

    /// Returns true while some guard is alive (or ownership is in transit).
    #[must_use]
    pub fn is_locked(&self) -> bool {
        *self.locked.lock()
    }

    /// Number of queued waiters.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.waiters.len()
    }

    /// Passes ownership to the oldest listening waiter, or unlocks.
    fn unlock(&self) {
        loop {
            let release = {
                let mut locked = self.locked.lock();
                let release = self.waiters.dequeue(());
                if release.is_empty() {
                    *locked = false;
                    return;
                }
                release
            };
            if release.release() > 0 {
                tracing::trace!("lock handed to next waiter");
                return;
            }
        }
    }
}

impl Default for AsyncLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AsyncLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncLock")
            .field("locked", &self.is_locked())
            .field("waiters", &self.waiters())
            .finish()
    }
}

/// Future returned by [`AsyncLock::lock`].
#[must_use = "futures do nothing unless polled"]
pub struct LockFuture<'a> {
    lock: &'a AsyncLock,
    entry: Option<WaitEntry<()>>,
}

impl<'a> Future for LockFuture<'a> {
    type Output = AsyncLockGuard<'a>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        loop {
            let lock = self.lock;
            let Some(entry) = self.entry.as_mut() else {
                let mut locked = lock.locked.lock();
                if !*locked {
                    *locked = true;
                    return Poll::Ready(AsyncLockGuard { lock });
                }
                // Enqueued under the flag lock so an unlock cannot slip in
                // between the check and the enqueue.
                self.entry = Some(lock.waiters.enqueue());
                continue;
            };
            match Pin::new(entry).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(())) => {
                    self.entry = None;
                    return Poll::Ready(AsyncLockGuard { lock });
                }
                Poll::Ready(Err(WaitError::Canceled)) => {
                    // Never canceled by the lock itself; start over.
                    self.entry = None;
                }
            }
        }
    }
}

impl Drop for LockFuture<'_> {
    fn drop(&mut self) {
        if let Some(mut entry) = self.entry.take() {
            if let Some(Ok(())) = entry.abandon() {
                self.lock.unlock();
            }
        }
    }
}

impl fmt::Debug for LockFuture<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFuture")
            .field("waiting", &self.entry.is_some())
            .finish()
    }
}

/// Ownership of an [`AsyncLock`]; unlocks (or hands off) on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct AsyncLockGuard<'a> {
    lock: &'a AsyncLock,
}

impl Drop for AsyncLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

impl fmt::Debug for AsyncLockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncLockGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, poll_once};

    #[test]
    fn uncontended_lock_is_immediate() {
        init_test_logging();
        let lock = AsyncLock::new();
        let mut fut = lock.lock();
        let guard = match poll_once(&mut fut) {
            Poll::Ready(guard) => guard,
            Poll::Pending => panic!("free lock should be taken immediately"),
        };
        assert!(lock.is_locked());
        assert_eq!(lock.try_lock().unwrap_err(), TryLockError::WouldBlock);
        drop(guard);
        assert!(!lock.is_locked());
    }

    #[test]
    fn unlock_hands_off_in_fifo_order() {
        init_test_logging();
        let lock = AsyncLock::new();
        let guard = lock.try_lock().expect("free");
        let mut first = lock.lock();
        let mut second = lock.lock();
        assert!(poll_once(&mut first).is_pending());
        assert!(poll_once(&mut second).is_pending());
        assert_eq!(lock.waiters(), 2);

        drop(guard);
        assert!(lock.is_locked());
        assert!(poll_once(&mut second).is_pending());
        let first_guard = match poll_once(&mut first) {
            Poll::Ready(guard) => guard,
            Poll::Pending => panic!("first waiter owns the lock"),
        };
        drop(first_guard);
        assert!(matches!(poll_once(&mut second), Poll::Ready(_)));
    }

    #[test]
    fn abandoned_waiter_passes_ownership_on() {
        init_test_logging();
        let lock = AsyncLock::new();
        let guard = lock.try_lock().expect("free");
        let mut abandoned = lock.lock();
        let mut next = lock.lock();
        assert!(poll_once(&mut abandoned).is_pending());
        assert!(poll_once(&mut next).is_pending());

        drop(guard);
        // Ownership went to `abandoned`, which is dropped without polling.
        drop(abandoned);
        let Poll::Ready(guard) = poll_once(&mut next) else {
            panic!("ownership should have moved on");
        };
        drop(guard);
        assert!(!lock.is_locked());
    }

    #[test]
    fn dropped_waiter_before_handoff_is_skipped() {
        let lock = AsyncLock::new();
        let guard = lock.try_lock().expect("free");
        let mut gone = lock.lock();
        assert!(poll_once(&mut gone).is_pending());
        drop(gone);
        assert_eq!(lock.waiters(), 0);
        drop(guard);
        assert!(!lock.is_locked());
    }
}
