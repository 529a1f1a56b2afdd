//! Failure-policy flags for microthreads.
//!
//! # Example
//!
//! ```ignore
//! use microthread::MicroThreadFlags;
//!
//! let flags = MicroThreadFlags::SUPPRESS_UNOBSERVED_FAILURE;
//! assert!(flags.suppresses_unobserved_failure());
//! ```

use std::ops::{BitOr, BitOrAssign};

/// Policy flags attached to a microthread when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct MicroThreadFlags(u8);

impl MicroThreadFlags {
    /// No flags.
    pub const NONE: Self = Self(0);

    /// Swallow a failure nobody awaits instead of re-raising it from
    /// [`Scheduler::run`](crate::Scheduler::run).
    pub const SUPPRESS_UNOBSERVED_FAILURE: Self = Self(1 << 0);

    /// Create flags from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Get raw bits.
    #[must_use]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Check if every flag in `other` is set.
    #[must_use]
    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Check if no flag is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Check if unobserved failures are swallowed.
    #[must_use]
    pub const fn suppresses_unobserved_failure(&self) -> bool {
        (self.0 & Self::SUPPRESS_UNOBSERVED_FAILURE.0) != 0
    }
}

impl BitOr for MicroThreadFlags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MicroThreadFlags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}
