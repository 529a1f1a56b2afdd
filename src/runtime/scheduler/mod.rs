//! Single-threaded cooperative scheduler.
//!
//! The scheduler owns a ready queue of continuations (microthread
//! resumptions and free callbacks) ordered by `(priority, sequence)`.
//! [`Scheduler::run`] is called by the host, typically once per frame, and
//! drains the queue on the calling thread:
//!
//! 1. On the outermost run: microthreads parked with
//!    [`Cx::next_frame`](crate::Cx::next_frame) and continuations posted from
//!    other threads are merged into the ready queue.
//! 2. Entries are popped one at a time. A microthread entry polls the
//!    microthread's computation until it suspends or finishes; an action
//!    entry invokes its callback.
//! 3. Work enqueued during the pass runs in the same pass.
//! 4. Once the queue is empty, unobserved failures collected during the pass
//!    are returned.
//!
//! Wakeups coming from the microthread currently being polled are absorbed:
//! the computation is polled again before the turn ends.

mod entry;
mod injector;
mod node;

pub use node::ScheduleNode;

use self::entry::{EntryTarget, SchedulerEntry};
use self::injector::Injector;
use self::node::{ActionFn, ActionNode};
use super::microthread::{Computation, MicroThread, MicroThreadInner};
use super::waker::waker_for;
use super::when_all::WhenAll;
use crate::config::SchedulerConfig;
use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::observability::{SchedulerCounters, SchedulerSnapshot, run_profiling_key};
use crate::types::{
    EntryToken, MicroThreadFlags, MicroThreadId, MicroThreadState, Priority, ProfilingKey,
    ScheduleMode,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BinaryHeap};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};

/// Where an unhandled failure came from.
#[derive(Debug, Clone)]
pub enum FaultSource {
    /// A microthread whose failure nobody awaited.
    MicroThread {
        /// The failed microthread.
        id: MicroThreadId,
        /// Its diagnostic tag.
        tag: Option<ProfilingKey>,
    },
    /// A free continuation.
    Action {
        /// Token carried by the entry.
        token: Option<EntryToken>,
        /// Tag carried by the entry.
        tag: Option<ProfilingKey>,
    },
}

/// A failure nobody observed, offered to the unhandled-fault hook.
#[derive(Debug, Clone)]
pub struct UnhandledFault {
    /// Origin of the failure.
    pub source: FaultSource,
    /// The failure.
    pub error: Error,
}

type FaultHook = Arc<dyn Fn(&UnhandledFault) -> bool + Send + Sync>;

/// Lifecycle notification delivered to the lifecycle hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A microthread was added. `switched_from` is set when it continues a
    /// computation that switched out of another microthread.
    Created {
        /// The new microthread.
        id: MicroThreadId,
        /// Microthread whose computation it continues.
        switched_from: Option<MicroThreadId>,
    },
    /// A microthread was polled for the first time.
    Started {
        /// The microthread.
        id: MicroThreadId,
    },
    /// A microthread reached a terminal state and left the registry.
    Ended {
        /// The microthread.
        id: MicroThreadId,
        /// Its terminal state.
        state: MicroThreadState,
    },
    /// An outermost run began.
    RunBegin {
        /// Ordinal of the run, starting at 1.
        run: u64,
    },
    /// An outermost run drained its queue.
    RunEnd {
        /// Ordinal of the run.
        run: u64,
    },
}

type LifecycleHook = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Microthread currently being polled, and on which OS thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Running {
    id: MicroThreadId,
    os_thread: ThreadId,
}

/// Scheduler state guarded by a single lock.
struct Core {
    ready: BinaryHeap<SchedulerEntry>,
    next_sequence: u64,
    /// Value of `next_sequence` when the current entry was dequeued.
    turn_start: u64,
    running: Option<Running>,
    /// Thread executing `run`, set for the duration of the outermost run.
    run_thread: Option<ThreadId>,
    run_depth: usize,
    frame_waiters: Vec<Arc<MicroThreadInner>>,
    /// Live microthreads.
    registry: BTreeMap<MicroThreadId, Arc<MicroThreadInner>>,
    pending_failures: Vec<Error>,
    next_completion: u64,
    counters: SchedulerCounters,
}

impl Core {
    fn new() -> Self {
        Self {
            ready: BinaryHeap::new(),
            next_sequence: 0,
            turn_start: 0,
            running: None,
            run_thread: None,
            run_depth: 0,
            frame_waiters: Vec::new(),
            registry: BTreeMap::new(),
            pending_failures: Vec::new(),
            next_completion: 0,
            counters: SchedulerCounters::default(),
        }
    }

    fn push(&mut self, target: EntryTarget, mode: ScheduleMode) {
        self.next_sequence += 1;
        self.ready
            .push(SchedulerEntry::new(target, self.next_sequence, mode));
    }
}

/// Outcome of one microthread turn.
enum Turn {
    Suspended,
    Switch,
    Finished(Result<()>),
}

pub(crate) struct Shared {
    config: SchedulerConfig,
    core: Mutex<Core>,
    injector: Injector,
    fault_hook: RwLock<Option<FaultHook>>,
    lifecycle_hook: RwLock<Option<LifecycleHook>>,
}

impl Shared {
    fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            core: Mutex::new(Core::new()),
            injector: Injector::new(),
            fault_hook: RwLock::new(None),
            lifecycle_hook: RwLock::new(None),
        }
    }

    /// Returns true if `id` is being polled on the calling thread.
    pub(crate) fn is_current(&self, id: MicroThreadId) -> bool {
        let me = thread::current().id();
        self.core.lock().running == Some(Running { id, os_thread: me })
    }

    pub(crate) fn has_ready_work(&self) -> bool {
        !self.core.lock().ready.is_empty()
    }

    /// Enqueues an entry directly when called from the running dispatch
    /// thread, otherwise defers it to the next outermost run.
    fn push_target(&self, target: EntryTarget, mode: ScheduleMode) {
        let me = thread::current().id();
        let mut core = self.core.lock();
        if core.run_thread == Some(me) {
            core.push(target, mode);
        } else {
            drop(core);
            self.injector.inject(target, mode);
        }
    }

    /// Waker entry point.
    pub(crate) fn post(&self, thread: &Arc<MicroThreadInner>) {
        let in_turn = self.is_current(thread.id);
        {
            let mut core = thread.core.lock();
            if core.state.is_terminal() {
                drop(core);
                self.report_late_wakeup(thread.id);
                return;
            }
            if core.polling && in_turn {
                core.repoll = true;
                return;
            }
            if core.queued {
                return;
            }
            core.queued = true;
        }
        tracing::trace!(microthread = %thread.id, "microthread posted");
        self.push_target(
            EntryTarget::MicroThread(Arc::clone(thread)),
            thread.schedule_mode(),
        );
    }

    pub(crate) fn schedule_thread(
        &self,
        thread: &Arc<MicroThreadInner>,
        mode: ScheduleMode,
    ) -> Result<bool> {
        {
            let mut core = thread.core.lock();
            if core.state.is_terminal() {
                return Err(Error::schedule_after_terminal(thread.id));
            }
            if core.queued {
                return Ok(false);
            }
            core.queued = true;
        }
        self.push_target(EntryTarget::MicroThread(Arc::clone(thread)), mode);
        Ok(true)
    }

    /// Re-queues the running microthread run-last (yield).
    pub(crate) fn requeue_current(&self, thread: &Arc<MicroThreadInner>) {
        thread.core.lock().queued = true;
        self.core
            .lock()
            .push(EntryTarget::MicroThread(Arc::clone(thread)), ScheduleMode::Last);
    }

    pub(crate) fn park_until_next_frame(&self, thread: &Arc<MicroThreadInner>) {
        thread.core.lock().queued = true;
        self.core.lock().frame_waiters.push(Arc::clone(thread));
    }

    /// Delivers a lifecycle event. Never called with a scheduler lock held.
    fn notify(&self, event: LifecycleEvent) {
        let hook = self.lifecycle_hook.read().clone();
        let Some(hook) = hook else { return };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(&event))) {
            tracing::error!(
                panic = %crate::error::panic_message(payload.as_ref()),
                event = ?event,
                "lifecycle hook panicked"
            );
        }
    }

    fn report_late_wakeup(&self, id: MicroThreadId) {
        tracing::error!(microthread = %id, "wakeup posted to a finished microthread");
        if self.config.strict_wakeups {
            self.core
                .lock()
                .pending_failures
                .push(Error::schedule_after_terminal(id));
        }
    }

    pub(crate) fn spawn<F, Fut>(
        self: &Arc<Self>,
        priority: Priority,
        flags: MicroThreadFlags,
        computation: F,
    ) -> MicroThread
    where
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let thread = MicroThreadInner::new(
            Arc::downgrade(self),
            priority,
            flags,
            self.config.default_schedule_mode,
            None,
        );
        let future = computation(Cx::new(Arc::clone(&thread)));
        *thread.computation.lock() = Some(Box::pin(future));
        thread.core.lock().queued = true;
        self.core
            .lock()
            .registry
            .insert(thread.id, Arc::clone(&thread));
        tracing::trace!(microthread = %thread.id, priority, "microthread added");
        self.notify(LifecycleEvent::Created {
            id: thread.id,
            switched_from: None,
        });
        self.push_target(
            EntryTarget::MicroThread(Arc::clone(&thread)),
            ScheduleMode::Last,
        );
        MicroThread::from_inner(thread)
    }

    fn schedule_node(&self, node: &Arc<ActionNode>, mode: ScheduleMode) -> bool {
        let Some(ticket) = node.arm() else {
            return false;
        };
        self.push_target(
            EntryTarget::Action {
                node: Arc::clone(node),
                ticket,
            },
            mode,
        );
        true
    }

    fn run(self: &Arc<Self>) -> Result<()> {
        let me = thread::current().id();
        let (frame, depth, run_index) = {
            let mut core = self.core.lock();
            match core.run_thread {
                Some(owner) if owner != me => {
                    return Err(Error::internal("scheduler is already running on another thread"));
                }
                Some(_) => {
                    // Nested run: only entries queued since the calling entry
                    // was dequeued; the rest waits for the outer pass.
                    core.run_depth += 1;
                    let watermark = core.turn_start;
                    let (fresh, outer): (Vec<_>, Vec<_>) = std::mem::take(&mut core.ready)
                        .into_iter()
                        .partition(|entry| entry.sequence.unsigned_abs() > watermark);
                    core.ready = fresh.into_iter().collect();
                    (
                        RunFrame::nested(self, outer.into_iter().collect()),
                        core.run_depth,
                        None,
                    )
                }
                None => {
                    core.run_depth = 1;
                    core.run_thread = Some(me);
                    core.counters.runs += 1;
                    for thread in std::mem::take(&mut core.frame_waiters) {
                        core.push(EntryTarget::MicroThread(thread), ScheduleMode::Last);
                    }
                    while let Some(injected) = self.injector.pop() {
                        core.push(injected.target, injected.mode);
                    }
                    (RunFrame::outermost(self), 1, Some(core.counters.runs))
                }
            }
        };
        if let Some(run) = run_index {
            self.notify(LifecycleEvent::RunBegin { run });
        }

        let span = tracing::debug_span!(
            "scheduler.run",
            scheduler = %self.config.name,
            key = %run_profiling_key(),
            depth,
        );
        let guard = span.enter();
        loop {
            let next = {
                let mut core = self.core.lock();
                core.turn_start = core.next_sequence;
                core.ready.pop()
            };
            let Some(entry) = next else { break };
            let mode = entry.mode();
            match entry.target {
                EntryTarget::MicroThread(thread) => self.resume(&thread),
                EntryTarget::Action { node, ticket } => {
                    self.invoke_action(&node, ticket, mode, entry.token, entry.tag);
                }
            }
        }
        drop(guard);

        drop(frame);
        let Some(run) = run_index else {
            return Ok(());
        };
        self.notify(LifecycleEvent::RunEnd { run });

        let failures = std::mem::take(&mut self.core.lock().pending_failures);
        let mut failures = failures.into_iter();
        match failures.next() {
            None => Ok(()),
            Some(first) => {
                for extra in failures {
                    tracing::error!(error = %extra, "additional unobserved failure in the same pass");
                }
                Err(first)
            }
        }
    }

    /// Starts a turn: claims the computation unless the microthread is
    /// finished, switched away or already being polled further up the stack.
    /// The flag is true on the microthread's first turn.
    fn begin_turn(&self, thread: &Arc<MicroThreadInner>) -> Option<(Computation, bool)> {
        let mut core = thread.core.lock();
        core.queued = false;
        if core.state.is_terminal() {
            return None;
        }
        if core.polling {
            // Resumed by a nested run while its own poll is still on the
            // stack: let that poll go around again instead.
            core.repoll = true;
            return None;
        }
        let computation = thread.computation.lock().take()?;
        let started = core.state == MicroThreadState::NotStarted;
        if started {
            core.state = MicroThreadState::Running;
        }
        core.polling = true;
        Some((computation, started))
    }

    fn resume(self: &Arc<Self>, thread: &Arc<MicroThreadInner>) {
        let Some((mut computation, started)) = self.begin_turn(thread) else {
            tracing::trace!(microthread = %thread.id, "skipped resume");
            return;
        };
        if started {
            self.notify(LifecycleEvent::Started { id: thread.id });
        }
        let previous = {
            let mut core = self.core.lock();
            core.counters.resumes += 1;
            core.running.replace(Running {
                id: thread.id,
                os_thread: thread::current().id(),
            })
        };
        tracing::trace!(microthread = %thread.id, "resuming microthread");

        let waker = waker_for(thread);
        let mut task_cx = Context::from_waker(&waker);
        let turn = loop {
            let polled =
                panic::catch_unwind(AssertUnwindSafe(|| computation.as_mut().poll(&mut task_cx)));
            match polled {
                Ok(Poll::Ready(result)) => break Turn::Finished(result),
                Err(payload) => {
                    let error = Error::panicked(payload.as_ref()).with_microthread(thread.id);
                    break Turn::Finished(Err(error));
                }
                Ok(Poll::Pending) => {
                    let mut core = thread.core.lock();
                    if core.switch_requested {
                        core.switch_requested = false;
                        core.repoll = false;
                        break Turn::Switch;
                    }
                    let again = core.repoll && !core.queued;
                    core.repoll = false;
                    if !again {
                        break Turn::Suspended;
                    }
                }
            }
        };

        self.core.lock().running = previous;
        match turn {
            Turn::Suspended => {
                *thread.computation.lock() = Some(computation);
                thread.core.lock().polling = false;
            }
            Turn::Switch => {
                thread.core.lock().polling = false;
                self.switch_into_new(thread, computation);
            }
            Turn::Finished(result) => {
                drop(computation);
                thread.core.lock().polling = false;
                self.finish(thread, result);
            }
        }
    }

    fn switch_into_new(&self, origin: &Arc<MicroThreadInner>, computation: Computation) {
        let target = MicroThreadInner::new(
            origin.scheduler.clone(),
            origin.priority(),
            origin.flags,
            origin.schedule_mode(),
            origin.tag(),
        );
        *target.computation.lock() = Some(computation);
        {
            let mut core = target.core.lock();
            core.forward_to = Some(Arc::clone(origin));
            core.queued = true;
        }
        origin.core.lock().switched_to = Some(Arc::clone(&target));
        if origin.is_cancel_requested() {
            target.request_cancel();
        }
        tracing::debug!(from = %origin.id, to = %target.id, "switched to new microthread");
        let id = target.id;
        {
            let mut core = self.core.lock();
            core.registry.insert(id, Arc::clone(&target));
            core.push(EntryTarget::MicroThread(target), ScheduleMode::Last);
        }
        self.notify(LifecycleEvent::Created {
            id,
            switched_from: Some(origin.id),
        });
    }

    fn finish(&self, thread: &Arc<MicroThreadInner>, result: Result<()>) {
        let state = match &result {
            Ok(()) => MicroThreadState::Completed,
            Err(err) if err.is_cancelled() => MicroThreadState::Canceled,
            Err(_) => MicroThreadState::Faulted,
        };
        let order = {
            let mut core = self.core.lock();
            core.registry.remove(&thread.id);
            core.counters.finished += 1;
            core.next_completion += 1;
            core.next_completion
        };
        let (joiners, observed, forward_to) = {
            let mut core = thread.core.lock();
            core.state = state;
            core.result = Some(result.clone());
            core.completion_order = order;
            core.cancel_waiters.clear();
            core.switched_to = None;
            (
                std::mem::take(&mut core.joiners),
                core.observers > 0,
                core.forward_to.take(),
            )
        };
        thread.clear_locals();

        match &result {
            Ok(()) => tracing::trace!(microthread = %thread.id, "microthread completed"),
            Err(err) if state == MicroThreadState::Canceled => {
                tracing::debug!(microthread = %thread.id, reason = %err, "microthread canceled");
            }
            Err(err) => {
                tracing::debug!(microthread = %thread.id, error = %err, observed, "microthread faulted");
            }
        }
        for (_, waker) in joiners {
            waker.wake();
        }
        self.notify(LifecycleEvent::Ended {
            id: thread.id,
            state,
        });

        if let Some(origin) = forward_to {
            self.finish(&origin, result);
            return;
        }
        if let Err(error) = result {
            if state == MicroThreadState::Faulted && !observed {
                self.unobserved_failure(thread, error);
            }
        }
    }

    fn unobserved_failure(&self, thread: &MicroThreadInner, error: Error) {
        if thread.flags.suppresses_unobserved_failure() {
            tracing::debug!(microthread = %thread.id, error = %error, "suppressed unobserved failure");
            return;
        }
        self.escalate(UnhandledFault {
            source: FaultSource::MicroThread {
                id: thread.id,
                tag: thread.tag(),
            },
            error,
        });
    }

    fn escalate(&self, fault: UnhandledFault) {
        let hook = self.fault_hook.read().clone();
        if let Some(hook) = hook {
            let handled = panic::catch_unwind(AssertUnwindSafe(|| hook(&fault)))
                .unwrap_or_else(|payload| {
                    tracing::error!(
                        panic = %crate::error::panic_message(payload.as_ref()),
                        "unhandled-fault hook panicked"
                    );
                    false
                });
            if handled {
                tracing::debug!(error = %fault.error, "failure handled by hook");
                return;
            }
        }
        if self.config.propagate_unobserved_failures {
            tracing::warn!(
                error = %fault.error,
                source = ?fault.source,
                "unobserved failure, raising after the current pass"
            );
            self.core.lock().pending_failures.push(fault.error);
        } else {
            tracing::error!(
                error = %fault.error,
                source = ?fault.source,
                "unobserved failure"
            );
        }
    }

    fn invoke_action(
        &self,
        node: &Arc<ActionNode>,
        ticket: u64,
        mode: ScheduleMode,
        token: Option<EntryToken>,
        tag: Option<ProfilingKey>,
    ) {
        if !node.claim(ticket) {
            tracing::trace!("stale action entry skipped");
            return;
        }
        let Some(mut callback) = node.take_callback() else {
            // Dequeued by a nested run from inside its own callback.
            if node.defer(ticket, mode) {
                tracing::trace!(tag = ?tag, "action busy, deferred until it returns");
            }
            return;
        };
        let previous = {
            let mut core = self.core.lock();
            core.counters.actions += 1;
            core.running.take()
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| callback()))
            .unwrap_or_else(|payload| Err(Error::panicked(payload.as_ref())));
        self.core.lock().running = previous;
        node.restore_callback(callback);
        if let Some((ticket, mode)) = node.take_deferred() {
            self.push_target(
                EntryTarget::Action {
                    node: Arc::clone(node),
                    ticket,
                },
                mode,
            );
        }

        match result {
            Ok(()) => {}
            Err(error) if error.is_cancelled() => {
                tracing::debug!(tag = ?tag, "action canceled");
            }
            Err(error) => self.escalate(UnhandledFault {
                source: FaultSource::Action { token, tag },
                error,
            }),
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Live computations hold contexts pointing at their own records;
        // drop them so those records can be freed.
        let core = self.core.get_mut();
        core.ready.clear();
        core.frame_waiters.clear();
        let registry = std::mem::take(&mut core.registry);
        for thread in registry.into_values() {
            let computation = thread.computation.lock().take();
            drop(computation);
        }
        while self.injector.pop().is_some() {}
    }
}

/// Restores run bookkeeping when a run exits, even by unwinding.
struct RunFrame<'a> {
    shared: &'a Shared,
    outer: Option<BinaryHeap<SchedulerEntry>>,
}

impl<'a> RunFrame<'a> {
    fn outermost(shared: &'a Shared) -> Self {
        Self {
            shared,
            outer: None,
        }
    }

    fn nested(shared: &'a Shared, outer: BinaryHeap<SchedulerEntry>) -> Self {
        Self {
            shared,
            outer: Some(outer),
        }
    }
}

impl Drop for RunFrame<'_> {
    fn drop(&mut self) {
        let mut core = self.shared.core.lock();
        core.run_depth = core.run_depth.saturating_sub(1);
        match self.outer.take() {
            Some(outer) => {
                let leftover = std::mem::replace(&mut core.ready, outer);
                for entry in leftover {
                    core.ready.push(entry);
                }
            }
            None => core.run_thread = None,
        }
    }
}

/// Cooperative microthread scheduler.
///
/// Cloning gives another handle to the same scheduler.
///
/// # Example
///
/// ```ignore
/// let scheduler = Scheduler::new();
/// let order = Arc::new(Mutex::new(Vec::new()));
/// for priority in [5, 1, 5] {
///     let order = Arc::clone(&order);
///     scheduler.add_with(priority, MicroThreadFlags::NONE, move |_cx| async move {
///         order.lock().push(priority);
///         Ok(())
///     });
/// }
/// scheduler.run()?;
/// assert_eq!(*order.lock(), vec![1, 5, 5]);
/// ```
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Creates a scheduler with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Creates a scheduler with the given configuration.
    #[must_use]
    pub fn with_config(mut config: SchedulerConfig) -> Self {
        config.normalize();
        tracing::debug!(scheduler = %config.name, "scheduler created");
        Self {
            shared: Arc::new(Shared::new(config)),
        }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Adds a microthread with the default priority and flags.
    ///
    /// `computation` receives the microthread's [`Cx`] and returns the
    /// future to run. The microthread is queued run-last and starts on the
    /// next pass.
    pub fn add<F, Fut>(&self, computation: F) -> MicroThread
    where
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let config = &self.shared.config;
        self.add_with(config.default_priority, config.default_flags, computation)
    }

    /// Adds a microthread with an explicit priority and flags.
    pub fn add_with<F, Fut>(
        &self,
        priority: Priority,
        flags: MicroThreadFlags,
        computation: F,
    ) -> MicroThread
    where
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.shared.spawn(priority, flags, computation)
    }

    /// Creates an unscheduled free-continuation node.
    ///
    /// The callback runs each time the node is dequeued. A returned error
    /// (or panic) goes through the unhandled-fault path.
    pub fn create_node<F>(&self, priority: Priority, callback: F) -> ScheduleNode
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        let callback: ActionFn = Box::new(callback);
        ScheduleNode::new(ActionNode::new(priority, callback))
    }

    /// Queues a one-shot free continuation run-last.
    ///
    /// `token` and `tag` travel with the entry and are reported with a
    /// failure of `action`.
    pub fn add_action<F>(
        &self,
        priority: Priority,
        token: Option<EntryToken>,
        tag: Option<ProfilingKey>,
        action: F,
    ) -> ScheduleNode
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let mut action = Some(action);
        let node = self.create_node(priority, move || action.take().map_or(Ok(()), |f| f()));
        if let Some(token) = token {
            node.set_token(token);
        }
        if let Some(tag) = tag {
            node.set_tag(tag);
        }
        self.schedule(&node, ScheduleMode::Last);
        node
    }

    /// Queues a node. Returns `false` if it is already queued.
    pub fn schedule(&self, node: &ScheduleNode, mode: ScheduleMode) -> bool {
        self.shared.schedule_node(&node.node, mode)
    }

    /// Withdraws a queued node. Returns `false` if it was not queued.
    pub fn unschedule(&self, node: &ScheduleNode) -> bool {
        node.node.disarm()
    }

    /// Runs one pass: drains the ready queue on the calling thread.
    ///
    /// May be called from inside a microthread or action of this scheduler;
    /// such a nested run only drains work queued since that microthread or
    /// action was dequeued. Older entries wait for the outer pass.
    ///
    /// # Errors
    ///
    /// The first unobserved, unsuppressed failure of the pass (others are
    /// logged), strict-mode wakeups of finished microthreads, or an internal
    /// error if another thread is already running the scheduler.
    pub fn run(&self) -> Result<()> {
        self.shared.run()
    }

    /// Returns a future resolving once every given microthread finished.
    ///
    /// See [`WhenAll`] for the failure rules.
    pub fn when_all<'a, I>(&self, microthreads: I) -> WhenAll
    where
        I: IntoIterator<Item = &'a MicroThread>,
    {
        WhenAll::new(microthreads.into_iter().map(MicroThread::join).collect())
    }

    /// Returns the microthread being polled on the calling thread, if any.
    #[must_use]
    pub fn current_microthread(&self) -> Option<MicroThread> {
        let core = self.shared.core.lock();
        let running = core.running?;
        if running.os_thread != thread::current().id() {
            return None;
        }
        core.registry
            .get(&running.id)
            .cloned()
            .map(MicroThread::from_inner)
    }

    /// Returns every live microthread, ordered by id.
    #[must_use]
    pub fn micro_threads(&self) -> Vec<MicroThread> {
        self.shared
            .core
            .lock()
            .registry
            .values()
            .cloned()
            .map(MicroThread::from_inner)
            .collect()
    }

    /// Returns true while a run is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.core.lock().run_depth > 0
    }

    /// Number of entries waiting to run, including cross-thread posts not
    /// merged yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.core.lock().ready.len() + self.shared.injector.len()
    }

    /// Installs the unhandled-fault hook.
    ///
    /// The hook sees every unobserved, unsuppressed failure. Returning `true`
    /// marks it handled; `false` applies the configured policy.
    pub fn set_unhandled_fault_hook<F>(&self, hook: F)
    where
        F: Fn(&UnhandledFault) -> bool + Send + Sync + 'static,
    {
        *self.shared.fault_hook.write() = Some(Arc::new(hook));
    }

    /// Removes the unhandled-fault hook.
    pub fn clear_unhandled_fault_hook(&self) {
        *self.shared.fault_hook.write() = None;
    }

    /// Installs a hook called on every [`LifecycleEvent`].
    ///
    /// Runs on the thread that caused the event, with no scheduler lock
    /// held. A panicking hook is logged and otherwise ignored.
    pub fn set_lifecycle_hook<F>(&self, hook: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        *self.shared.lifecycle_hook.write() = Some(Arc::new(hook));
    }

    /// Removes the lifecycle hook.
    pub fn clear_lifecycle_hook(&self) {
        *self.shared.lifecycle_hook.write() = None;
    }

    /// Returns a monitoring snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let (threads, queued, waiting_next_frame, counters) = {
            let core = self.shared.core.lock();
            (
                core.registry.values().cloned().collect::<Vec<_>>(),
                core.ready.len(),
                core.frame_waiters.len(),
                core.counters,
            )
        };
        SchedulerSnapshot {
            name: self.shared.config.name.clone(),
            queued: queued + self.shared.injector.len(),
            waiting_next_frame,
            microthreads: threads.iter().map(|thread| thread.info()).collect(),
            counters,
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.shared.config.name)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
