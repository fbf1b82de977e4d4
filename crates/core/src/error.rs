//! Error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for operations that fail with a classified application error.
pub type AppResult<T> = Result<T, AppError>;

/// Classification of a failure, independent of the concrete error type.
///
/// Every kind maps to exactly one user-facing message and one transport-level
/// status. `Internal` is the default for anything unclassified.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Validation,
    Timeout,
    Unimplemented,
    Internal,
}

impl ErrorKind {
    /// HTTP-style status code for this kind.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Validation => 400,
            ErrorKind::Timeout => 408,
            ErrorKind::Unimplemented => 501,
            ErrorKind::Internal => 500,
        }
    }

    /// Fixed message safe to show to an end user.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "You are not authorized to perform this action.",
            ErrorKind::Forbidden => "You do not have permission to perform this action.",
            ErrorKind::NotFound => "The requested resource was not found.",
            ErrorKind::Conflict => "The request conflicts with the current state of the resource.",
            ErrorKind::Validation => "Invalid input provided.",
            ErrorKind::Timeout => "The operation timed out. Please try again later.",
            ErrorKind::Unimplemented => "This feature is not yet implemented.",
            ErrorKind::Internal => "An unexpected error occurred. Please try again later.",
        }
    }

    /// Whether an `AppError` message of this kind is written for the caller
    /// and may be returned verbatim instead of the fixed message.
    pub fn carries_caller_message(self) -> bool {
        matches!(
            self,
            ErrorKind::NotFound | ErrorKind::Conflict | ErrorKind::Validation
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unimplemented => "unimplemented",
            ErrorKind::Internal => "internal",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level error with an explicit classification.
///
/// Business code raises this when it knows what went wrong (e.g. a missing
/// cart); anything else is classified by the exception boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct AppError {
    kind: ErrorKind,
    message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    pub fn unimplemented(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unimplemented, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    /// Message to hand back to the caller.
    ///
    /// Only kinds whose messages are caller-facing keep their own text.
    pub fn user_message(&self) -> String {
        if self.kind.carries_caller_message() && !self.message.is_empty() {
            self.message.clone()
        } else {
            self.kind.user_message().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ErrorKind; 8] = [
        ErrorKind::Unauthorized,
        ErrorKind::Forbidden,
        ErrorKind::NotFound,
        ErrorKind::Conflict,
        ErrorKind::Validation,
        ErrorKind::Timeout,
        ErrorKind::Unimplemented,
        ErrorKind::Internal,
    ];

    #[test]
    fn every_kind_has_a_distinct_status() {
        let mut codes: Vec<u16> = ALL.iter().map(|k| k.status_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), ALL.len());
    }

    #[test]
    fn internal_errors_never_echo_their_message() {
        let err = AppError::internal("connection string postgres://admin:pw@db");
        assert_eq!(err.user_message(), ErrorKind::Internal.user_message());
    }

    #[test]
    fn not_found_keeps_caller_message() {
        let err = AppError::not_found("cart for user 7 not found");
        assert_eq!(err.user_message(), "cart for user 7 not found");
    }

    #[test]
    fn empty_caller_message_falls_back_to_fixed_text() {
        let err = AppError::validation("");
        assert_eq!(err.user_message(), ErrorKind::Validation.user_message());
    }
}
