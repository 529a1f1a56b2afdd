//! Scheduler configuration.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `name` | `"microthread-scheduler"` |
//! | `default_priority` | `0` |
//! | `default_flags` | [`MicroThreadFlags::NONE`] |
//! | `default_schedule_mode` | [`ScheduleMode::Last`] |
//! | `propagate_unobserved_failures` | `true` |
//! | `strict_wakeups` | `true` |

use crate::types::{MicroThreadFlags, Priority, ScheduleMode};

const DEFAULT_NAME: &str = "microthread-scheduler";

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Diagnostic name, recorded on every run span.
    pub name: String,
    /// Priority given to microthreads added without an explicit one.
    pub default_priority: Priority,
    /// Flags given to microthreads added without explicit ones.
    pub default_flags: MicroThreadFlags,
    /// Schedule mode new microthreads start with.
    pub default_schedule_mode: ScheduleMode,
    /// Re-raise unobserved, unsuppressed failures from `run`.
    ///
    /// When off, such failures are logged at error level and dropped.
    pub propagate_unobserved_failures: bool,
    /// Surface wakeups of finished microthreads as a `run` error.
    ///
    /// When off, they are logged at error level only.
    pub strict_wakeups: bool,
}

impl SchedulerConfig {
    /// Sets the diagnostic name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the default priority.
    #[must_use]
    pub const fn with_default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = priority;
        self
    }

    /// Sets the default flags.
    #[must_use]
    pub const fn with_default_flags(mut self, flags: MicroThreadFlags) -> Self {
        self.default_flags = flags;
        self
    }

    /// Sets the default schedule mode.
    #[must_use]
    pub const fn with_default_schedule_mode(mut self, mode: ScheduleMode) -> Self {
        self.default_schedule_mode = mode;
        self
    }

    /// Enables or disables re-raising unobserved failures.
    #[must_use]
    pub const fn with_propagate_unobserved_failures(mut self, propagate: bool) -> Self {
        self.propagate_unobserved_failures = propagate;
        self
    }

    /// Enables or disables strict wakeup checking.
    #[must_use]
    pub const fn with_strict_wakeups(mut self, strict: bool) -> Self {
        self.strict_wakeups = strict;
        self
    }

    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        let trimmed = self.name.trim();
        if trimmed.is_empty() {
            self.name = DEFAULT_NAME.to_string();
        } else if trimmed.len() != self.name.len() {
            self.name = trimmed.to_string();
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            default_priority: 0,
            default_flags: MicroThreadFlags::NONE,
            default_schedule_mode: ScheduleMode::Last,
            propagate_unobserved_failures: true,
            strict_wakeups: true,
        }
    }
}
