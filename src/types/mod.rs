//! Core types shared by the scheduler, microthreads and primitives.
//!
//! - [`id`]: Identifier types (`MicroThreadId`) and the process-unique id source
//! - [`flags`]: Failure-policy flags for microthreads
//! - [`state`]: Microthread lifecycle states and scheduling modes
//! - [`tag`]: Diagnostic tags and opaque entry tokens

pub mod flags;
pub mod id;
pub mod state;
pub mod tag;

pub use flags::MicroThreadFlags;
pub use id::MicroThreadId;
pub use state::{MicroThreadState, ScheduleMode};
pub use tag::{EntryToken, ProfilingKey};

/// Scheduling priority. Lower values run first.
pub type Priority = i64;
