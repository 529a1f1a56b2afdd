//! Monitoring snapshots and the process-wide run profiling key.
//!
//! [`SchedulerSnapshot`] is what a debugging tool polls once per frame: the
//! live microthreads with their states plus a few dispatch counters. All
//! snapshot types serialize with `serde`.

use crate::types::{MicroThreadId, MicroThreadState, Priority, ProfilingKey, ScheduleMode};
use serde::Serialize;
use std::sync::OnceLock;

static RUN_PROFILING_KEY: OnceLock<ProfilingKey> = OnceLock::new();

/// Returns the profiling key recorded on every scheduler run span.
///
/// Registered on first use and kept for the life of the process.
pub fn run_profiling_key() -> &'static ProfilingKey {
    RUN_PROFILING_KEY.get_or_init(|| ProfilingKey::new("microthread.scheduler.run"))
}

/// Point-in-time description of one microthread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MicroThreadInfo {
    /// Identifier.
    pub id: MicroThreadId,
    /// Lifecycle state.
    pub state: MicroThreadState,
    /// Current priority.
    pub priority: Priority,
    /// Current schedule mode.
    pub schedule_mode: ScheduleMode,
    /// Diagnostic tag, if any.
    pub tag: Option<ProfilingKey>,
    /// Whether cancellation was requested.
    pub cancel_requested: bool,
}

/// Dispatch counters accumulated over the scheduler's life.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerCounters {
    /// Outermost `run` calls.
    pub runs: u64,
    /// Microthread resumptions (one per dequeued microthread entry).
    pub resumes: u64,
    /// Free continuations invoked.
    pub actions: u64,
    /// Microthreads that reached a terminal state.
    pub finished: u64,
}

/// Point-in-time view of a scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    /// Scheduler name from its configuration.
    pub name: String,
    /// Entries waiting in the ready queue (including entries from other threads
    /// not yet merged).
    pub queued: usize,
    /// Microthreads parked until the next frame.
    pub waiting_next_frame: usize,
    /// Live (non-terminal) microthreads, ordered by id.
    pub microthreads: Vec<MicroThreadInfo>,
    /// Dispatch counters.
    pub counters: SchedulerCounters,
}
