//! Error taxonomy shared by every Garrison crate.
//!
//! All failures carry a stable machine-readable code (e.g. `"STORE-conflict"`)
//! next to a human-readable message. Codes never change once shipped; clients
//! and tests match on them instead of on message text.

use thiserror::Error;

/// Result type alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable, transport-agnostic error classification.
///
/// The first seven kinds map one-to-one onto the gRPC/HTTP codes exposed at
/// the API boundary. `Conflict` is store-internal: it marks an aggregate
/// sequence race and is recovered by the command engine's bounded retry
/// before it can surface (exhausted retries map to [`ErrorKind::FailedPrecondition`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input failed validation.
    InvalidArgument,
    /// A unique constraint is already taken.
    AlreadyExists,
    /// The requested object does not exist.
    NotFound,
    /// The object exists but is in a state that forbids the operation.
    FailedPrecondition,
    /// Missing or invalid authentication.
    Unauthenticated,
    /// Authenticated, but not allowed.
    PermissionDenied,
    /// Aggregate sequence raced with a concurrent push.
    Conflict,
    /// Store or infrastructure fault.
    Internal,
}

impl ErrorKind {
    /// Short lowercase tag used in logs and metrics labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::AlreadyExists => "already_exists",
            Self::NotFound => "not_found",
            Self::FailedPrecondition => "failed_precondition",
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied => "permission_denied",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        }
    }
}

/// Structured error with a stable code.
///
/// # Examples
///
/// ```
/// use garrison_core::error::{Error, ErrorKind};
///
/// let err = Error::invalid_argument("ORG-name-empty", "org name must not be empty");
/// assert_eq!(err.kind(), ErrorKind::InvalidArgument);
/// assert_eq!(err.code(), "ORG-name-empty");
/// ```
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct Error {
    kind: ErrorKind,
    code: &'static str,
    message: String,
}

impl Error {
    /// Create an error of an arbitrary kind.
    #[must_use]
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    /// Input failed validation.
    #[must_use]
    pub fn invalid_argument(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, code, message)
    }

    /// A unique constraint is already taken.
    #[must_use]
    pub fn already_exists(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, code, message)
    }

    /// The requested object does not exist.
    #[must_use]
    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, code, message)
    }

    /// The object is in a state that forbids the operation.
    #[must_use]
    pub fn failed_precondition(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, code, message)
    }

    /// Missing or invalid authentication.
    #[must_use]
    pub fn unauthenticated(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, code, message)
    }

    /// Authenticated, but not allowed.
    #[must_use]
    pub fn permission_denied(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, code, message)
    }

    /// Aggregate sequence raced with a concurrent push.
    #[must_use]
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, code, message)
    }

    /// Store or infrastructure fault.
    #[must_use]
    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, code, message)
    }

    /// The error classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` for [`ErrorKind::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound)
    }

    /// Returns `true` for [`ErrorKind::Conflict`].
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self.kind, ErrorKind::Conflict)
    }

    /// Returns `true` for [`ErrorKind::AlreadyExists`].
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self.kind, ErrorKind::AlreadyExists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_kind_and_code() {
        let err = Error::conflict("STORE-conflict", "sequence raced");
        assert!(err.is_conflict());
        assert_eq!(err.code(), "STORE-conflict");
        assert_eq!(err.message(), "sequence raced");
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = Error::not_found("SESSION-not-found", "session does not exist");
        assert_eq!(format!("{err}"), "SESSION-not-found: session does not exist");
    }

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(ErrorKind::FailedPrecondition.as_str(), "failed_precondition");
        assert_eq!(ErrorKind::Unauthenticated.as_str(), "unauthenticated");
    }
}
