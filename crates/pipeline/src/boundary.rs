//! Exception boundary: the only place raw faults are caught and classified.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::error;

use bazaar_auth::{AuthzError, CredentialError};
use bazaar_core::{AppError, Environment, ErrorKind, Failure, Outcome};

use crate::cache_store::CacheError;
use crate::invocation::Invocation;

/// Wraps the target so every fault (error or panic) becomes `Outcome::Failed`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionBoundary {
    environment: Environment,
}

impl ExceptionBoundary {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub async fn guard<T, E, Fut>(&self, invocation: &Invocation, target: Fut) -> Outcome<T>
    where
        Fut: Future<Output = Result<T, E>> + Send,
        E: Into<anyhow::Error>,
    {
        match AssertUnwindSafe(target).catch_unwind().await {
            Ok(Ok(value)) => Outcome::Success(value),
            Ok(Err(err)) => Outcome::Failed(self.classify_error(invocation, err.into())),
            Err(payload) => Outcome::Failed(self.classify_panic(invocation, payload)),
        }
    }

    fn classify_error(&self, invocation: &Invocation, err: anyhow::Error) -> Failure {
        let (kind, message) = classify(&err);
        let failure = Failure::new(kind, message);

        error!(
            request_id = %invocation.request_id(),
            component = invocation.operation().component(),
            operation = invocation.operation().operation(),
            kind = %kind,
            incident_id = %failure.incident_id,
            error = ?err,
            "operation failed"
        );

        if self.environment.is_development() {
            failure.with_cause(format!("{err:#}"))
        } else {
            failure
        }
    }

    fn classify_panic(&self, invocation: &Invocation, payload: Box<dyn Any + Send>) -> Failure {
        let detail = panic_message(payload.as_ref());
        let failure = Failure::new(ErrorKind::Internal, ErrorKind::Internal.user_message());

        error!(
            request_id = %invocation.request_id(),
            component = invocation.operation().component(),
            operation = invocation.operation().operation(),
            kind = %ErrorKind::Internal,
            incident_id = %failure.incident_id,
            panic = %detail,
            "operation panicked"
        );

        if self.environment.is_development() {
            failure.with_cause(format!("panic: {detail}"))
        } else {
            failure
        }
    }
}

/// Map an error to its kind and the message the caller is allowed to see.
pub(crate) fn classify(err: &anyhow::Error) -> (ErrorKind, String) {
    for cause in err.chain() {
        if let Some(app) = cause.downcast_ref::<AppError>() {
            return (app.kind(), app.user_message());
        }
        if let Some(authz) = cause.downcast_ref::<AuthzError>() {
            let kind = authz.kind();
            return (kind, kind.user_message().to_string());
        }
        if cause.downcast_ref::<CredentialError>().is_some() {
            return fixed(ErrorKind::Unauthorized);
        }
        if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return fixed(ErrorKind::Timeout);
        }
        if cause.downcast_ref::<serde_json::Error>().is_some() {
            return fixed(ErrorKind::Validation);
        }
        if cause.downcast_ref::<CacheError>().is_some() {
            return fixed(ErrorKind::Internal);
        }
    }
    fixed(ErrorKind::Internal)
}

fn fixed(kind: ErrorKind) -> (ErrorKind, String) {
    (kind, kind.user_message().to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
