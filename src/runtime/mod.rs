//! Scheduler runtime: the scheduler, microthreads and their suspension
//! points.

pub mod local;
pub mod microthread;
pub mod scheduler;
pub mod switch;
pub(crate) mod waker;
pub mod when_all;
pub mod yield_now;

pub use local::MicroThreadLocal;
pub use microthread::{Join, MicroThread};
pub use scheduler::{FaultSource, LifecycleEvent, ScheduleNode, Scheduler, UnhandledFault};
pub use switch::{MicroThreadScope, SwitchToNew};
pub use when_all::WhenAll;
pub use yield_now::{NextFrame, YieldNow};
