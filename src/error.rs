//! Error taxonomy for the engine. Programmer misuse (e.g. driving a
//! manager that was never started) panics at the call site instead of
//! getting a variant here; everything recoverable is an [`Error`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad configuration rejected at construction time.
    #[error("invalid configuration for {component}: {reason}")]
    Validation { component: &'static str, reason: String },

    /// A live source dropped, a decompressor crashed, etc. Surfaced via
    /// the viewer's error channel; never aborts the viewer or manager.
    #[error("{component} ({source_name}): {reason}")]
    Transient {
        component: &'static str,
        source_name: String,
        reason: String,
    },

    /// An operation the source/component does not implement.
    #[error("{operation} is not supported by {component}")]
    NotSupported {
        component: &'static str,
        operation: &'static str,
    },

    /// A named thing (viewer, trace report, trace group) does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// The operation's cancellation token fired. Callers treat this as
    /// a clean shutdown, never as a failure.
    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error in {component}: {reason}")]
    Parse { component: &'static str, reason: String },
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn validation(component: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation { component, reason: reason.into() }
    }

    pub fn transient(component: &'static str, source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Transient { component, source_name: source_name.into(), reason: reason.into() }
    }

    pub fn not_supported(component: &'static str, operation: &'static str) -> Self {
        Error::NotSupported { component, operation }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound { kind, name: name.into() }
    }

    pub fn parse(component: &'static str, reason: impl Into<String>) -> Self {
        Error::Parse { component, reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
