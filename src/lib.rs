//! Cooperative microthread scheduler.
//!
//! Many lightweight logical threads ("microthreads") run turn by turn on the
//! OS thread that calls [`Scheduler::run`]. Each microthread wraps a Rust
//! future; it only gives up control at suspension points (an awaited
//! operation that is not ready, an explicit [`Cx::yield_now`], a
//! [`Cx::next_frame`] or a [`Cx::switch_to_new_microthread`]).
//!
//! # Ordering
//!
//! Ready entries are ordered by `(priority, sequence)`: a lower priority value
//! runs first and equal priorities run in enqueue order. Entries scheduled
//! with [`ScheduleMode::First`] jump ahead of [`ScheduleMode::Last`] entries of
//! the same priority.
//!
//! # Failures
//!
//! A failing microthread that somebody awaits (via [`MicroThread::join`] or
//! [`Scheduler::when_all`]) reports its error there. An unobserved failure is
//! swallowed only when the microthread carries
//! [`MicroThreadFlags::SUPPRESS_UNOBSERVED_FAILURE`]; otherwise `run` returns
//! it once the current pass has drained.
//!
//! # Example
//!
//! ```ignore
//! use microthread::{Scheduler, MicroThreadFlags};
//!
//! let scheduler = Scheduler::new();
//! let worker = scheduler.add(|cx| async move {
//!     cx.yield_now().await?;
//!     Ok(())
//! });
//! scheduler.run()?;
//! assert!(worker.is_over());
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod cx;
pub mod error;
pub mod observability;
pub mod runtime;
pub mod sync;
pub mod test_utils;
pub mod types;

pub use config::SchedulerConfig;
pub use cx::Cx;
pub use error::{Error, ErrorKind, Result};
pub use runtime::{
    FaultSource, Join, LifecycleEvent, MicroThread, MicroThreadLocal, MicroThreadScope, NextFrame,
    ScheduleNode, Scheduler, SwitchToNew, UnhandledFault, WhenAll, YieldNow,
};
pub use types::{
    EntryToken, MicroThreadFlags, MicroThreadId, MicroThreadState, Priority, ProfilingKey,
    ScheduleMode,
};
