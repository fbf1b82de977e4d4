use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use bazaar_auth::{CredentialValidator, RoleRequirement, authorize};
use bazaar_core::{ErrorKind, Outcome};

use crate::interceptor::{BoxFuture, Interceptor, Next, Stage};
use crate::invocation::Invocation;

/// Resolves the bearer credential and enforces the operation's roles.
///
/// Missing or invalid credential short-circuits with `Unauthorized`; a valid
/// principal without a required role short-circuits with `Forbidden`. Neither
/// case runs any inner stage.
pub struct AuthorizationInterceptor {
    validator: Arc<dyn CredentialValidator>,
    requirement: RoleRequirement,
}

impl AuthorizationInterceptor {
    pub fn new(validator: Arc<dyn CredentialValidator>, requirement: RoleRequirement) -> Self {
        Self {
            validator,
            requirement,
        }
    }

    pub fn requirement(&self) -> &RoleRequirement {
        &self.requirement
    }
}

impl<T: Send + 'static> Interceptor<T> for AuthorizationInterceptor {
    fn stage(&self) -> Stage {
        Stage::Authorization
    }

    fn intercept<'a>(
        &'a self,
        invocation: &'a Invocation,
        next: Next<'a, T>,
    ) -> BoxFuture<'a, Outcome<T>> {
        Box::pin(async move {
            let op = invocation.operation();

            let Some(token) = invocation.bearer() else {
                warn!(
                    request_id = %invocation.request_id(),
                    component = op.component(),
                    operation = op.operation(),
                    "missing bearer credential"
                );
                return rejected(ErrorKind::Unauthorized);
            };

            let principal = match self.validator.validate(token, Utc::now()) {
                Ok(principal) => principal,
                Err(err) => {
                    warn!(
                        request_id = %invocation.request_id(),
                        component = op.component(),
                        operation = op.operation(),
                        error = %err,
                        "credential rejected"
                    );
                    return rejected(ErrorKind::Unauthorized);
                }
            };

            if let Err(err) = authorize(&principal, &self.requirement) {
                warn!(
                    request_id = %invocation.request_id(),
                    component = op.component(),
                    operation = op.operation(),
                    principal = %principal.id,
                    required = %self.requirement,
                    error = %err,
                    "access denied"
                );
                return rejected(err.kind());
            }

            debug!(
                request_id = %invocation.request_id(),
                principal = %principal.id,
                "principal authorized"
            );
            invocation.attach_principal(principal);

            next.run(invocation).await
        })
    }
}

/// Callers only ever see the fixed message for `kind`; the detail stays in
/// the log.
fn rejected<T>(kind: ErrorKind) -> Outcome<T> {
    Outcome::short_circuit(kind, kind.user_message())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bazaar_auth::{HmacJwtValidator, JwtSettings, Role};
    use bazaar_core::{Environment, OperationId};
    use chrono::Duration;

    use super::*;
    use crate::invocation::CallContext;
    use crate::pipeline::{Pipeline, PipelineBuilder, PipelineConfig};

    fn jwt() -> Arc<HmacJwtValidator> {
        Arc::new(HmacJwtValidator::new(JwtSettings::new("test-secret")))
    }

    fn admin_only(jwt: Arc<HmacJwtValidator>) -> Pipeline<u32> {
        PipelineBuilder::new(PipelineConfig::default().with_environment(Environment::Development))
            .authorize(jwt, RoleRequirement::any_of(["Admin"]))
            .build()
    }

    async fn run(p: &Pipeline<u32>, ctx: CallContext, calls: &AtomicUsize) -> Outcome<u32> {
        p.execute(OperationId::new("OrderQueryService", "GetAllOrders"), ctx, |_| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(3)
        })
        .await
    }

    #[tokio::test]
    async fn missing_credential_is_unauthorized() {
        let calls = AtomicUsize::new(0);
        let out = run(&admin_only(jwt()), CallContext::anonymous(), &calls).await;
        assert_eq!(out.kind(), Some(ErrorKind::Unauthorized));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_credential_is_unauthorized() {
        let jwt = jwt();
        let token = jwt
            .issue("1", None, vec![Role::from_static("Admin")], Utc::now() - Duration::hours(2))
            .unwrap();
        let calls = AtomicUsize::new(0);
        let out = run(&admin_only(jwt), CallContext::bearer(token), &calls).await;
        assert_eq!(out.kind(), Some(ErrorKind::Unauthorized));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejection_reason_is_the_fixed_user_message() {
        let signed_elsewhere = HmacJwtValidator::new(JwtSettings::new("other-secret"))
            .issue("1", None, vec![Role::from_static("Admin")], Utc::now())
            .unwrap();
        let calls = AtomicUsize::new(0);
        let out = run(&admin_only(jwt()), CallContext::bearer(signed_elsewhere), &calls).await;
        assert_eq!(
            out,
            Outcome::ShortCircuited {
                status: ErrorKind::Unauthorized,
                reason: ErrorKind::Unauthorized.user_message().to_string(),
            }
        );

        let jwt = jwt();
        let customer = jwt
            .issue("7", None, vec![Role::from_static("Customer")], Utc::now())
            .unwrap();
        let out = run(&admin_only(jwt), CallContext::bearer(customer), &calls).await;
        assert_eq!(
            out,
            Outcome::ShortCircuited {
                status: ErrorKind::Forbidden,
                reason: ErrorKind::Forbidden.user_message().to_string(),
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn principal_without_role_is_forbidden() {
        let jwt = jwt();
        let token = jwt
            .issue("7", None, vec![Role::from_static("Customer")], Utc::now())
            .unwrap();
        let calls = AtomicUsize::new(0);
        let out = run(&admin_only(jwt), CallContext::bearer(token), &calls).await;
        assert_eq!(out.kind(), Some(ErrorKind::Forbidden));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn authorized_principal_reaches_target_with_context() {
        let jwt = jwt();
        let token = jwt.issue("1", None, vec![Role::from_static("Admin")], Utc::now()).unwrap();
        let pipeline = admin_only(jwt);

        let out = pipeline
            .execute(
                OperationId::new("OrderQueryService", "GetAllOrders"),
                CallContext::bearer(token),
                |ctx| async move {
                    let who = ctx.principal.and_then(|p| p.id.as_user_id()).unwrap_or(0);
                    Ok::<_, anyhow::Error>(who as u32)
                },
            )
            .await;
        assert_eq!(out, Outcome::Success(1));
    }
}
