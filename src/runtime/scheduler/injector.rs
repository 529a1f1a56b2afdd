//! Cross-thread injection queue.
//!
//! Continuations posted from a thread other than the one currently running
//! the scheduler (or while no run is in progress) land here. They are merged
//! into the ready queue, in posting order, at the start of the next
//! outermost run, which keeps external posts out of an in-flight pass.

use super::entry::EntryTarget;
use crate::types::ScheduleMode;
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A continuation waiting to be merged into the ready queue.
pub(crate) struct Injected {
    pub(crate) target: EntryTarget,
    pub(crate) mode: ScheduleMode,
}

#[derive(Default)]
pub(crate) struct Injector {
    queue: SegQueue<Injected>,
    /// Approximate count of pending entries (for snapshots).
    pending_count: AtomicUsize,
}

impl Injector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inject(&self, target: EntryTarget, mode: ScheduleMode) {
        self.queue.push(Injected { target, mode });
        self.pending_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pop(&self) -> Option<Injected> {
        let injected = self.queue.pop()?;
        self.pending_count.fetch_sub(1, Ordering::Relaxed);
        Some(injected)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending_count.load(Ordering::Relaxed)
    }
}
