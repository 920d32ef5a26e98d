//! Runtime and storage error kinds.
//!
//! Compile-time problems accumulate as [`crate::diag::Diagnostic`]s; the
//! enums here cover everything that can go wrong after a module is loaded.
//! `disengage` is deliberately not represented: it is a control-flow signal
//! owned by the walker engine, not an error.

use std::fmt;

/// Errors raised while executing user code or traversing the graph.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeError {
    /// Two equally specific abilities matched one `(walker, node)` pair.
    AmbiguousAbility { walker: String, node: String },

    /// The actor is not allowed to touch the anchor. Reported to the actor
    /// as [`RuntimeError::NotFound`] so denied anchors stay invisible.
    AccessDenied(String),

    /// The referenced anchor, module, or callable does not exist.
    NotFound(String),

    /// A call was made with arguments the declaration does not accept.
    InvalidArgument(String),

    /// The request deadline elapsed mid-traversal.
    Timeout,

    /// User code raised; the payload is the rendered message.
    UserError(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::AmbiguousAbility { walker, node } => {
                write!(f, "ambiguous ability for walker '{walker}' on node '{node}'")
            }
            RuntimeError::AccessDenied(what) => write!(f, "access denied: {what}"),
            RuntimeError::NotFound(what) => write!(f, "not found: {what}"),
            RuntimeError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            RuntimeError::Timeout => write!(f, "deadline exceeded"),
            RuntimeError::UserError(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl RuntimeError {
    /// Machine-readable code used in the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            RuntimeError::AmbiguousAbility { .. } => "AMBIGUOUS_ABILITY",
            RuntimeError::AccessDenied(_) => "NOT_FOUND",
            RuntimeError::NotFound(_) => "NOT_FOUND",
            RuntimeError::InvalidArgument(_) => "INVALID_ARGUMENT",
            RuntimeError::Timeout => "TIMEOUT",
            RuntimeError::UserError(_) => "USER_ERROR",
        }
    }

    /// The externally visible form. Access denials are rewritten to
    /// not-found before anything leaves the runtime.
    pub fn sanitized(self) -> RuntimeError {
        match self {
            RuntimeError::AccessDenied(what) => RuntimeError::NotFound(what),
            other => other,
        }
    }
}

/// Errors surfaced by the persistent store.
#[derive(Clone, Debug, PartialEq)]
pub enum StorageError {
    /// Retryable I/O failure (lock contention, transient fs error).
    TransientIO(String),

    /// A persisted anchor failed to decode.
    CorruptAnchor(String),

    /// Insert conflicted with an existing row.
    AlreadyExists(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::TransientIO(msg) => write!(f, "transient storage error: {msg}"),
            StorageError::CorruptAnchor(msg) => write!(f, "corrupt anchor: {msg}"),
            StorageError::AlreadyExists(what) => write!(f, "already exists: {what}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::TransientIO(_))
    }
}

impl From<StorageError> for RuntimeError {
    fn from(err: StorageError) -> Self {
        RuntimeError::UserError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_sanitizes_to_not_found() {
        let err = RuntimeError::AccessDenied("anchor 42".into());
        assert_eq!(err.code(), "NOT_FOUND");
        match err.sanitized() {
            RuntimeError::NotFound(what) => assert_eq!(what, "anchor 42"),
            other => panic!("expected NotFound, got {other}"),
        }
    }

    #[test]
    fn only_transient_io_is_retryable() {
        assert!(StorageError::TransientIO("busy".into()).is_retryable());
        assert!(!StorageError::CorruptAnchor("bad json".into()).is_retryable());
        assert!(!StorageError::AlreadyExists("user".into()).is_retryable());
    }
}
