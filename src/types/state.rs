//! Microthread lifecycle states and scheduling modes.

use serde::Serialize;
use std::fmt;

/// Lifecycle state of a microthread.
///
/// ```text
/// NotStarted ──► Running ──┬──► Completed
///                 ▲    │   ├──► Faulted
///                 └────┘   └──► Canceled
/// ```
///
/// `Running` covers every suspend/resume cycle; terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MicroThreadState {
    /// Created and queued, never resumed yet.
    NotStarted,
    /// Resumed at least once and not finished.
    Running,
    /// The computation returned `Ok(())`.
    Completed,
    /// The computation returned an error or panicked.
    Faulted,
    /// The computation acknowledged a cancellation request.
    Canceled,
}

impl MicroThreadState {
    /// Returns true for `Completed`, `Faulted` and `Canceled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Faulted | Self::Canceled)
    }

    /// Returns a stable lowercase name, used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Faulted => "faulted",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for MicroThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a continuation lands among entries of the same priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ScheduleMode {
    /// Run next: ahead of every run-last entry of equal priority.
    First,
    /// Run last: behind every entry of equal priority already queued.
    #[default]
    Last,
}

impl ScheduleMode {
    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            Self::First => 0,
            Self::Last => 1,
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> Self {
        if raw == 0 { Self::First } else { Self::Last }
    }
}
