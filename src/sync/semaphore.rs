//! Counting semaphore with FIFO hand-off.
//!
//! A released permit goes straight to the oldest waiter; only when nobody
//! is waiting does it return to the pool.
//!
//! # Example
//!
//! ```ignore
//! let downloads = Arc::new(AsyncSemaphore::new(2));
//! scheduler.add(move |_cx| async move {
//!     let _permit = downloads.acquire().await;
//!     fetch().await?;
//!     Ok(())
//! });
//! ```

use super::completion::WaitError;
use super::wait_queue::{WaitEntry, WaitQueue};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;

/// Error returned by [`AsyncSemaphore::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryAcquireError {
    /// No permit is available.
    #[error("no semaphore permits available")]
    NoPermits,
}

/// Counting semaphore for microthreads.
pub struct AsyncSemaphore {
    permits: Mutex<usize>,
    waiters: WaitQueue<()>,
}

impl AsyncSemaphore {
    /// Creates a semaphore with `permits` available permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            waiters: WaitQueue::new(),
        }
    }

    /// Returns a future resolving to a permit.
    pub fn acquire(&self) -> AcquireFuture<'_> {
        AcquireFuture {
            semaphore: self,
            entry: None,
        }
    }

    /// Takes a permit if one is available and nobody is queued ahead.
    ///
    /// # Errors
    ///
    /// [`TryAcquireError::NoPermits`] otherwise.
    pub fn try_acquire(&self) -> Result<SemaphorePermit<'_>, TryAcquireError> {
        let mut permits = self.permits.lock();
        if *permits == 0 || !self.waiters.is_empty() {
            return Err(TryAcquireError::NoPermits);
        }
        *permits -= 1;
        Ok(SemaphorePermit { semaphore: self })
    }

    /// Permits currently in the pool.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        *self.permits.lock()
    }

    /// Adds `count` permits, serving waiters first.
    pub fn add_permits(&self, count: usize) {
        for _ in 0..count {
            self.release_one();
        }
    }

    fn release_one(&self) {
        loop {
            let release = {
                let mut permits = self.permits.lock();
                let release = self.waiters.dequeue(());
                if release.is_empty() {
                    *permits += 1;
                    return;
                }
                release
            };
            if release.release() > 0 {
                return;
            }
        }
    }
}

impl fmt::Debug for AsyncSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSemaphore")
            .field("permits", &self.available_permits())
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

/// Future returned by [`AsyncSemaphore::acquire`].
#[must_use = "futures do nothing unless polled"]
pub struct AcquireFuture<'a> {
    semaphore: &'a AsyncSemaphore,
    entry: Option<WaitEntry<()>>,
}

impl<'a> Future for AcquireFuture<'a> {
    type Output = SemaphorePermit<'a>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        loop {
            let semaphore = self.semaphore;
            let Some(entry) = self.entry.as_mut() else {
                let mut permits = semaphore.permits.lock();
                if *permits > 0 && semaphore.waiters.is_empty() {
                    *permits -= 1;
                    return Poll::Ready(SemaphorePermit { semaphore });
                }
                self.entry = Some(semaphore.waiters.enqueue());
                continue;
            };
            match Pin::new(entry).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(())) => {
                    self.entry = None;
                    return Poll::Ready(SemaphorePermit { semaphore });
                }
                Poll::Ready(Err(WaitError::Canceled)) => self.entry = None,
            }
        }
    }
}

impl Drop for AcquireFuture<'_> {
    fn drop(&mut self) {
        if let Some(mut entry) = self.entry.take() {
            if let Some(Ok(())) = entry.abandon() {
                self.semaphore.release_one();
            }
        }
    }
}

impl fmt::Debug for AcquireFuture<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquireFuture")
            .field("waiting", &self.entry.is_some())
            .finish()
    }
}

/// One permit; returned to the semaphore on drop.
#[must_use = "the permit is returned as soon as it is dropped"]
pub struct SemaphorePermit<'a> {
    semaphore: &'a AsyncSemaphore,
}

impl SemaphorePermit<'_> {
    /// Keeps the permit out of the pool for good.
    pub fn forget(self) {
        std::mem::forget(self);
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release_one();
    }
}

impl fmt::Debug for SemaphorePermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphorePermit").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, poll_once};

    #[test]
    fn permits_are_counted() {
        init_test_logging();
        let semaphore = AsyncSemaphore::new(2);
        let a = semaphore.try_acquire().expect("first");
        let _b = semaphore.try_acquire().expect("second");
        assert_eq!(
            semaphore.try_acquire().unwrap_err(),
            TryAcquireError::NoPermits
        );
        drop(a);
        assert_eq!(semaphore.available_permits(), 1);
    }

    #[test]
    fn release_serves_waiters_in_order() {
        init_test_logging();
        let semaphore = AsyncSemaphore::new(1);
        let held = semaphore.try_acquire().expect("free");
        let mut first = semaphore.acquire();
        let mut second = semaphore.acquire();
        assert!(poll_once(&mut first).is_pending());
        assert!(poll_once(&mut second).is_pending());
        drop(held);
        assert_eq!(semaphore.available_permits(), 0);
        assert!(poll_once(&mut second).is_pending());
        let Poll::Ready(permit) = poll_once(&mut first) else {
            panic!("first waiter gets the permit");
        };
        drop(permit);
        assert!(matches!(poll_once(&mut second), Poll::Ready(_)));
    }

    #[test]
    fn add_permits_wakes_waiters() {
        let semaphore = AsyncSemaphore::new(0);
        let mut waiter = semaphore.acquire();
        assert!(poll_once(&mut waiter).is_pending());
        semaphore.add_permits(2);
        let Poll::Ready(_permit) = poll_once(&mut waiter) else {
            panic!("waiter is served by the added permits");
        };
        assert_eq!(semaphore.available_permits(), 1);
    }

    #[test]
    fn forgotten_permit_is_not_returned() {
        let semaphore = AsyncSemaphore::new(1);
        semaphore.try_acquire().expect("free").forget();
        assert_eq!(semaphore.available_permits(), 0);
    }
}
