//! Identifier types.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MICROTHREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a microthread.
///
/// Identifiers are unique across every scheduler in the process, so a
/// microthread can be recognized even when handles from several schedulers
/// are mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct MicroThreadId(u64);

impl MicroThreadId {
    /// Allocates the next identifier.
    pub(crate) fn next() -> Self {
        Self(NEXT_MICROTHREAD_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Creates an identifier from a raw value (tests only).
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for MicroThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mt#{}", self.0)
    }
}
