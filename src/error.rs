//! Error types and error handling strategy for Strand.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Misuse of the submission surface fails synchronously at the call site
//! - Internal invariant violations are programming bugs and panic
//! - User faults are routed through the unhandled-fault observer or the
//!   work item's completion promise; they never corrupt scheduler state

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid use of the submission surface (atomic synchronous action,
    /// malformed sync descriptor). Raised synchronously from the
    /// submitting call.
    Misuse,
    /// Internal scheduler invariant violated. Indicates a bug in the
    /// scheduler itself; surfaced as a panic, never as a return value.
    Invariant,
    /// The work item was cancelled: dropped by `close()`, or its task
    /// unwound via the shared cancellation token.
    Cancelled,
    /// User code faulted: a synchronous action panicked, or an
    /// asynchronous task completed with an error.
    User,
}

impl ErrorKind {
    /// Returns a human-readable name for the kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Misuse => "Misuse",
            Self::Invariant => "Invariant",
            Self::Cancelled => "Cancelled",
            Self::User => "User",
        }
    }
}

/// The main error type for Strand operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
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

    /// Returns true if this error represents a user fault.
    #[must_use]
    pub const fn is_user_fault(&self) -> bool {
        matches!(self.kind, ErrorKind::User)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Creates a misuse error with a detail message.
    #[must_use]
    pub fn misuse(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Misuse).with_message(detail)
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Creates a user-fault error with a detail message.
    #[must_use]
    pub fn user(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(detail)
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.name())?;
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

/// A specialized Result type for Strand operations.
pub type Result<T> = core::result::Result<T, Error>;
