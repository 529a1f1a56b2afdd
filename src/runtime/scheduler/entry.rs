//! Ready-queue entries and their ordering.

use super::node::ActionNode;
use crate::runtime::microthread::MicroThreadInner;
use crate::types::{EntryToken, Priority, ProfilingKey, ScheduleMode};
use std::cmp::Ordering;
use std::sync::Arc;

/// What a ready-queue entry resumes when dequeued.
#[derive(Clone)]
pub(crate) enum EntryTarget {
    /// Resume a microthread.
    MicroThread(Arc<MicroThreadInner>),
    /// Invoke a free continuation. `ticket` must still match the node's
    /// pending ticket when dequeued, otherwise the entry is stale.
    Action { node: Arc<ActionNode>, ticket: u64 },
}

impl EntryTarget {
    pub(crate) fn priority(&self) -> Priority {
        match self {
            Self::MicroThread(thread) => thread.priority(),
            Self::Action { node, .. } => node.priority(),
        }
    }
}

/// One continuation waiting in the ready queue.
///
/// Ordering: lower priority value first, then lower signed sequence.
/// Run-last entries take `+sequence` and run-first entries `-sequence`, so a
/// run-first entry precedes every run-last entry of equal priority and the
/// most recent run-first entry precedes older ones.
pub(crate) struct SchedulerEntry {
    pub(crate) target: EntryTarget,
    pub(crate) priority: Priority,
    /// Signed insertion order.
    pub(crate) sequence: i64,
    pub(crate) token: Option<EntryToken>,
    pub(crate) tag: Option<ProfilingKey>,
}

impl SchedulerEntry {
    pub(crate) fn new(target: EntryTarget, sequence: u64, mode: ScheduleMode) -> Self {
        let priority = target.priority();
        let (token, tag) = match &target {
            EntryTarget::MicroThread(thread) => (None, thread.tag()),
            EntryTarget::Action { node, .. } => (node.token(), node.tag()),
        };
        Self {
            target,
            priority,
            sequence: signed_sequence(sequence, mode),
            token,
            tag,
        }
    }
}

impl SchedulerEntry {
    pub(crate) fn mode(&self) -> ScheduleMode {
        if self.sequence < 0 {
            ScheduleMode::First
        } else {
            ScheduleMode::Last
        }
    }
}

fn signed_sequence(sequence: u64, mode: ScheduleMode) -> i64 {
    let magnitude = i64::try_from(sequence).unwrap_or(i64::MAX);
    match mode {
        ScheduleMode::Last => magnitude,
        ScheduleMode::First => -magnitude,
    }
}

impl PartialEq for SchedulerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for SchedulerEntry {}

impl Ord for SchedulerEntry {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse both keys so the smallest
        // (priority, sequence) pair pops first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for SchedulerEntry {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
