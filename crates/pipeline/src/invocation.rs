use std::sync::OnceLock;
use std::time::Duration;

use bazaar_auth::Principal;
use bazaar_core::{OperationId, RequestId};

/// Caller-supplied context for one call: the bearer credential (if any) and
/// the request id used to correlate log lines.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    bearer: Option<String>,
    request_id: RequestId,
}

impl CallContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer: Some(token.into()),
            request_id: RequestId::new(),
        }
    }

    /// Build from a raw `Authorization` header value.
    ///
    /// Anything that is not a non-empty `Bearer <token>` counts as absent.
    pub fn from_authorization_header(header: Option<&str>) -> Self {
        let bearer = header
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        Self {
            bearer,
            request_id: RequestId::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }
}

/// Per-call state shared by every stage of one pipeline execution.
///
/// Stages only get a shared reference; the write-once slots are how they
/// hand results to one another (the resolved principal, the elapsed time).
#[derive(Debug)]
pub struct Invocation {
    operation: OperationId,
    request_id: RequestId,
    bearer: Option<String>,
    principal: OnceLock<Principal>,
    elapsed: OnceLock<Duration>,
}

impl Invocation {
    pub fn new(operation: OperationId, context: CallContext) -> Self {
        Self {
            operation,
            request_id: context.request_id,
            bearer: context.bearer,
            principal: OnceLock::new(),
            elapsed: OnceLock::new(),
        }
    }

    pub fn operation(&self) -> &OperationId {
        &self.operation
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref()
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.get()
    }

    /// Attach the resolved principal. Only the first call has an effect.
    pub fn attach_principal(&self, principal: Principal) {
        let _ = self.principal.set(principal);
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed.get().copied()
    }

    pub(crate) fn record_elapsed(&self, elapsed: Duration) {
        let _ = self.elapsed.set(elapsed);
    }
}

/// What the target operation gets to see of its invocation.
#[derive(Debug, Clone)]
pub struct TargetContext {
    pub request_id: RequestId,
    pub principal: Option<Principal>,
}

impl From<&Invocation> for TargetContext {
    fn from(invocation: &Invocation) -> Self {
        Self {
            request_id: invocation.request_id(),
            principal: invocation.principal().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_well_formed_bearer_headers_carry_a_token() {
        let ok = CallContext::from_authorization_header(Some("Bearer abc.def"));
        assert_eq!(ok.bearer.as_deref(), Some("abc.def"));

        for bad in [None, Some("Basic abc"), Some("Bearer   "), Some("bearer abc")] {
            assert!(CallContext::from_authorization_header(bad).bearer.is_none());
        }
    }
}
