//! Wakers that post a microthread back to its scheduler.
//!
//! A microthread's waker is its synchronization context: whatever completes
//! an awaited operation calls `wake`, which either asks the running poll to
//! go around again (self-wake during the microthread's own turn) or enqueues
//! the microthread as a continuation.
//!
//! Note: This implementation uses safe Rust only (no unsafe).

use super::microthread::MicroThreadInner;
use std::sync::Arc;
use std::task::{Wake, Waker};

struct MicroThreadWaker {
    thread: Arc<MicroThreadInner>,
}

impl Wake for MicroThreadWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        match self.thread.scheduler.upgrade() {
            Some(shared) => shared.post(&self.thread),
            None => tracing::trace!(
                microthread = %self.thread.id,
                "wakeup after scheduler dropped"
            ),
        }
    }
}

/// Creates the waker handed to a microthread's computation.
#[must_use]
pub(crate) fn waker_for(thread: &Arc<MicroThreadInner>) -> Waker {
    Waker::from(Arc::new(MicroThreadWaker {
        thread: Arc::clone(thread),
    }))
}
