//! Synchronization primitives for microthreads.
//!
//! Everything here is built on completion sources: one-shot values that a
//! producer resolves and any number of futures await. The primitives are
//! thread-safe, so a microthread can wait on something completed by another
//! OS thread; the wakeup then reaches the scheduler through the injector.
//!
//! # Primitives
//!
//! - [`CompletionSource`] / [`Completion`]: one-shot value
//! - [`WaitQueue`]: FIFO of pending sources with deferred [`Release`]
//! - [`CompletionSignal`]: re-armable gate
//! - [`AsyncLock`]: FIFO hand-off mutual exclusion
//! - [`AsyncSemaphore`]: counting semaphore with FIFO hand-off
//!
//! # Locking
//!
//! Internal locks only guard bookkeeping. Waiters are always resolved after
//! those locks are released.

mod completion;
mod lock;
mod semaphore;
mod signal;
mod wait_queue;

pub use completion::{Completion, CompletionSource, WaitError};
pub use lock::{AsyncLock, AsyncLockGuard, LockFuture, TryLockError};
pub use semaphore::{AcquireFuture, AsyncSemaphore, SemaphorePermit, TryAcquireError};
pub use signal::CompletionSignal;
pub use wait_queue::{Release, WaitEntry, WaitQueue, WaitToken};
