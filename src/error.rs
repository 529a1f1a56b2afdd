//! Error types and error handling strategy for the microthread scheduler.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Panics inside a microthread are caught and converted to
//!   [`ErrorKind::Panicked`] so they follow the same propagation policy as
//!   returned errors
//! - Scheduling-protocol violations fail fast with their own kinds
//!
//! # Error Categories
//!
//! - **Cancellation**: a cooperative cancellation request was honored
//! - **Protocol**: the scheduler was driven in a way that would lose work
//!   (scheduling a terminal microthread, suspending outside a microthread)
//! - **Failure**: the computation itself failed or panicked
//! - **Internal**: scheduler bugs and invalid states

use core::fmt;
use std::any::Any;
use std::sync::Arc;

use crate::types::MicroThreadId;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Cancellation ===
    /// The computation observed a cancellation request and unwound.
    Cancelled,

    // === Protocol ===
    /// A continuation was posted against a microthread in a terminal state.
    ScheduleAfterTerminal,
    /// A suspension helper was awaited outside its owning microthread.
    NotInMicroThread,

    // === Failure ===
    /// The computation panicked.
    Panicked,
    /// User-provided error.
    User,

    // === Internal ===
    /// Internal scheduler error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::ScheduleAfterTerminal | Self::NotInMicroThread => ErrorCategory::Protocol,
            Self::Panicked | Self::User => ErrorCategory::Failure,
            Self::Internal => ErrorCategory::Internal,
        }
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Cooperative cancellation.
    Cancellation,
    /// Scheduling-protocol violations.
    Protocol,
    /// Failures of the scheduled computation.
    Failure,
    /// Internal scheduler errors.
    Internal,
}

/// Diagnostic context for an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// The microthread the error is attributed to.
    pub microthread: Option<MicroThreadId>,
}

/// The main error type for scheduler operations and microthread results.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    context: ErrorContext,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            context: ErrorContext { microthread: None },
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error is a scheduling-protocol violation.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self.kind.category(), ErrorCategory::Protocol)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds structured context to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        self.context = ctx;
        self
    }

    /// Attributes the error to a microthread.
    #[must_use]
    pub fn with_microthread(mut self, id: MicroThreadId) -> Self {
        self.context.microthread = Some(id);
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the error context.
    #[must_use]
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Creates a user error with a message.
    #[must_use]
    pub fn user(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(msg)
    }

    /// Wraps an arbitrary error as a user error.
    #[must_use]
    pub fn from_source(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        let message = source.to_string();
        Self::new(ErrorKind::User)
            .with_message(message)
            .with_source(source)
    }

    /// Creates an error from a caught panic payload.
    #[must_use]
    pub fn panicked(payload: &(dyn Any + Send)) -> Self {
        Self::new(ErrorKind::Panicked).with_message(panic_message(payload))
    }

    /// Creates an internal error (scheduler bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    pub(crate) fn schedule_after_terminal(id: MicroThreadId) -> Self {
        Self::new(ErrorKind::ScheduleAfterTerminal)
            .with_message(format!("continuation posted to {id} after it finished"))
            .with_microthread(id)
    }

    pub(crate) fn not_in_microthread(id: MicroThreadId) -> Self {
        Self::new(ErrorKind::NotInMicroThread)
            .with_message(format!("awaited outside of its owning microthread {id}"))
            .with_microthread(id)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A specialized Result type for scheduler operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_without_message() {
        let err = Error::new(ErrorKind::Internal);
        assert_eq!(err.to_string(), "Internal");
    }

    #[test]
    fn display_with_message() {
        let err = Error::user("boom");
        assert_eq!(err.to_string(), "User: boom");
    }

    #[test]
    fn from_source_keeps_chain() {
        let err = Error::from_source(Underlying);
        assert_eq!(err.kind(), ErrorKind::User);
        assert_eq!(err.message(), Some("underlying"));
        assert!(err.source().is_some());
    }

    #[test]
    fn protocol_kinds_are_classified() {
        let id = MicroThreadId::new_for_test(3);
        let err = Error::schedule_after_terminal(id);
        assert!(err.is_protocol_violation());
        assert_eq!(err.context().microthread, Some(id));
        assert!(Error::not_in_microthread(id).is_protocol_violation());
        assert!(!Error::cancelled().is_protocol_violation());
        assert_eq!(Error::cancelled().category(), ErrorCategory::Cancellation);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let caught = std::panic::catch_unwind(|| -> u32 { panic!("exploded") }).unwrap_err();
        let err = Error::panicked(caught.as_ref());
        assert_eq!(err.kind(), ErrorKind::Panicked);
        assert_eq!(err.message(), Some("exploded"));

        let caught = std::panic::catch_unwind(|| -> u32 { panic!("{} {}", "formatted", 1) }).unwrap_err();
        assert_eq!(Error::panicked(caught.as_ref()).message(), Some("formatted 1"));
    }
}
