//! Reusable free-continuation nodes.
//!
//! A node is a callback that can be scheduled, unscheduled and scheduled
//! again without allocating. At most one queue entry per node is live:
//! every schedule arms a fresh ticket and the dispatcher only invokes the
//! callback when the dequeued entry still carries the armed ticket.
//! Unscheduling disarms the node, leaving the queued entry stale.
//!
//! The callback is taken out of its slot while it runs. An entry dequeued
//! by a nested run while the callback is still on the stack re-arms the
//! node and is deferred until that invocation returns.

use crate::error::Result;
use crate::types::{EntryToken, Priority, ProfilingKey, ScheduleMode};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

pub(crate) type ActionFn = Box<dyn FnMut() -> Result<()> + Send>;

pub(crate) struct ActionNode {
    priority: AtomicI64,
    /// Empty while the callback runs.
    callback: Mutex<Option<ActionFn>>,
    /// Re-run requested while the callback was running.
    deferred: Mutex<Option<(u64, ScheduleMode)>>,
    token: Mutex<Option<EntryToken>>,
    tag: Mutex<Option<ProfilingKey>>,
    armed: Mutex<Option<u64>>,
    next_ticket: AtomicU64,
}

impl ActionNode {
    pub(crate) fn new(priority: Priority, callback: ActionFn) -> Arc<Self> {
        Arc::new(Self {
            priority: AtomicI64::new(priority),
            callback: Mutex::new(Some(callback)),
            deferred: Mutex::new(None),
            token: Mutex::new(None),
            tag: Mutex::new(None),
            armed: Mutex::new(None),
            next_ticket: AtomicU64::new(1),
        })
    }

    pub(crate) fn priority(&self) -> Priority {
        self.priority.load(Ordering::Acquire)
    }

    pub(crate) fn token(&self) -> Option<EntryToken> {
        self.token.lock().clone()
    }

    pub(crate) fn tag(&self) -> Option<ProfilingKey> {
        self.tag.lock().clone()
    }

    /// Arms a new ticket. Returns `None` if the node is already scheduled.
    pub(crate) fn arm(&self) -> Option<u64> {
        let mut armed = self.armed.lock();
        if armed.is_some() {
            return None;
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        *armed = Some(ticket);
        Some(ticket)
    }

    pub(crate) fn disarm(&self) -> bool {
        self.armed.lock().take().is_some()
    }

    /// Consumes the armed ticket if it matches the dequeued entry.
    pub(crate) fn claim(&self, ticket: u64) -> bool {
        let mut armed = self.armed.lock();
        if *armed == Some(ticket) {
            *armed = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed.lock().is_some()
    }

    /// Takes the callback for an invocation. `None` means it is already
    /// running further up the stack.
    pub(crate) fn take_callback(&self) -> Option<ActionFn> {
        self.callback.lock().take()
    }

    pub(crate) fn restore_callback(&self, callback: ActionFn) {
        *self.callback.lock() = Some(callback);
    }

    /// Puts a claimed ticket back and remembers to re-queue it once the
    /// running invocation returns. Gives up if the node was re-armed since.
    pub(crate) fn defer(&self, ticket: u64, mode: ScheduleMode) -> bool {
        let mut armed = self.armed.lock();
        if armed.is_some() {
            return false;
        }
        *armed = Some(ticket);
        *self.deferred.lock() = Some((ticket, mode));
        true
    }

    /// Returns the deferred re-run, if its ticket is still armed.
    pub(crate) fn take_deferred(&self) -> Option<(u64, ScheduleMode)> {
        let (ticket, mode) = self.deferred.lock().take()?;
        (*self.armed.lock() == Some(ticket)).then_some((ticket, mode))
    }
}

/// Handle to a reusable free continuation.
///
/// Created with [`Scheduler::create_node`](crate::Scheduler::create_node) or
/// returned by [`Scheduler::add_action`](crate::Scheduler::add_action).
#[derive(Clone)]
pub struct ScheduleNode {
    pub(crate) node: Arc<ActionNode>,
}

impl ScheduleNode {
    pub(crate) fn new(node: Arc<ActionNode>) -> Self {
        Self { node }
    }

    /// Returns the priority used the next time the node is scheduled.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.node.priority()
    }

    /// Changes the priority. An already queued entry keeps its old one.
    pub fn set_priority(&self, priority: Priority) {
        self.node.priority.store(priority, Ordering::Release);
    }

    /// Attaches an opaque token reported with failures of this node.
    pub fn set_token(&self, token: EntryToken) {
        *self.node.token.lock() = Some(token);
    }

    /// Returns the attached token.
    #[must_use]
    pub fn token(&self) -> Option<EntryToken> {
        self.node.token()
    }

    /// Attaches a diagnostic tag.
    pub fn set_tag(&self, tag: ProfilingKey) {
        *self.node.tag.lock() = Some(tag);
    }

    /// Returns the diagnostic tag.
    #[must_use]
    pub fn tag(&self) -> Option<ProfilingKey> {
        self.node.tag()
    }

    /// Returns true while an entry for this node is waiting to run.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.node.is_armed()
    }
}

impl fmt::Debug for ScheduleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleNode")
            .field("priority", &self.priority())
            .field("tag", &self.tag())
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arming_is_exclusive_until_claimed() {
        let node = ActionNode::new(0, Box::new(|| Ok(())));
        let first = node.arm().expect("fresh node arms");
        assert!(node.arm().is_none());
        assert!(node.claim(first));
        assert!(!node.claim(first));
        assert!(node.arm().is_some());
    }

    #[test]
    fn deferred_rerun_keeps_the_node_armed() {
        let node = ActionNode::new(0, Box::new(|| Ok(())));
        let callback = node.take_callback().expect("idle node has its callback");
        assert!(node.take_callback().is_none());

        let ticket = node.arm().expect("fresh node arms");
        assert!(node.claim(ticket));
        assert!(node.defer(ticket, ScheduleMode::First));
        assert!(node.is_armed());
        assert!(node.arm().is_none());

        node.restore_callback(callback);
        assert_eq!(node.take_deferred(), Some((ticket, ScheduleMode::First)));
        assert!(node.take_deferred().is_none());
        assert!(node.claim(ticket));
    }

    #[test]
    fn unscheduled_deferred_rerun_is_dropped() {
        let node = ActionNode::new(0, Box::new(|| Ok(())));
        let ticket = node.arm().expect("fresh node arms");
        assert!(node.claim(ticket));
        assert!(node.defer(ticket, ScheduleMode::Last));
        assert!(node.disarm());
        assert!(node.take_deferred().is_none());
    }

    #[test]
    fn disarm_makes_ticket_stale() {
        let node = ActionNode::new(0, Box::new(|| Ok(())));
        let ticket = node.arm().expect("fresh node arms");
        assert!(node.disarm());
        assert!(!node.disarm());
        let rearmed = node.arm().expect("disarmed node arms again");
        assert_ne!(ticket, rearmed);
        assert!(!node.claim(ticket));
        assert!(node.claim(rearmed));
    }
}
