//! Diagnostic tags and opaque entry tokens.

use serde::{Serialize, Serializer};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Diagnostic tag attached to microthreads, scheduler entries and runs.
///
/// Shows up in tracing fields and monitoring snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProfilingKey(Arc<str>);

impl ProfilingKey {
    /// Creates a key with the given name.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Returns the key's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfilingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ProfilingKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl From<&str> for ProfilingKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque token carried by a scheduler entry.
///
/// The scheduler never looks inside; it hands the token back through
/// [`UnhandledFault`](crate::UnhandledFault) so the owner of a failing
/// continuation can be identified.
#[derive(Clone)]
pub struct EntryToken(Arc<dyn Any + Send + Sync>);

impl EntryToken {
    /// Wraps a value as a token.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Returns the wrapped value if it has type `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Returns true if both tokens wrap the same allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for EntryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryToken").finish_non_exhaustive()
    }
}
