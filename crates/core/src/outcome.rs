//! The result model shared by every pipeline stage.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// A classified failure produced by the exception boundary.
///
/// `message` is always safe to show to a caller. `cause` carries diagnostic
/// detail and is only populated in development mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    pub cause: Option<String>,
    /// Correlates the caller-visible failure with the logged diagnostics.
    pub incident_id: Uuid,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            incident_id: Uuid::now_v7(),
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }
}

/// Outcome of one operation passed through the interceptor chain.
///
/// Once a stage produces `ShortCircuited` or `Failed`, no inner stage runs;
/// outer stages still observe the outcome on the way out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum Outcome<T> {
    Success(T),
    ShortCircuited { status: ErrorKind, reason: String },
    Failed(Failure),
}

impl<T> Outcome<T> {
    pub fn short_circuit(status: ErrorKind, reason: impl Into<String>) -> Self {
        Outcome::ShortCircuited {
            status,
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Error kind for non-successful outcomes.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Success(_) => None,
            Outcome::ShortCircuited { status, .. } => Some(*status),
            Outcome::Failed(f) => Some(f.kind),
        }
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::ShortCircuited { .. } => "short_circuited",
            Outcome::Failed(_) => "failed",
        }
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            Outcome::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_success(self) -> Option<T> {
        match self {
            Outcome::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(v) => Outcome::Success(f(v)),
            Outcome::ShortCircuited { status, reason } => Outcome::ShortCircuited { status, reason },
            Outcome::Failed(failure) => Outcome::Failed(failure),
        }
    }

    /// Collapse into a `Result`, turning short-circuits into failures.
    pub fn into_result(self) -> Result<T, Failure> {
        match self {
            Outcome::Success(v) => Ok(v),
            Outcome::ShortCircuited { status, .. } => {
                Err(Failure::new(status, status.user_message()))
            }
            Outcome::Failed(failure) => Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_circuit_reports_its_status() {
        let out: Outcome<u32> = Outcome::short_circuit(ErrorKind::Forbidden, "missing role");
        assert_eq!(out.kind(), Some(ErrorKind::Forbidden));
        assert!(!out.is_success());

        let err = out.into_result().unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.message, ErrorKind::Forbidden.user_message());
    }

    #[test]
    fn map_only_touches_success() {
        let ok: Outcome<u32> = Outcome::Success(2);
        assert_eq!(ok.map(|v| v * 10), Outcome::Success(20));

        let failed: Outcome<u32> = Outcome::Failed(Failure::new(ErrorKind::Timeout, "slow"));
        assert_eq!(failed.map(|v| v * 10).kind(), Some(ErrorKind::Timeout));
    }
}
