use std::fmt::Debug;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, info, warn};

use bazaar_core::Outcome;

use crate::interceptor::{BoxFuture, Interceptor, Next, Stage};
use crate::invocation::Invocation;

/// Logs entry (component, operation, argument summary) and exit (outcome,
/// truncated result).
///
/// Rendering the result never fails the call: a panicking `Debug` impl is
/// caught and reported separately.
#[derive(Debug, Clone)]
pub struct LoggingInterceptor {
    max_result_chars: usize,
}

impl Default for LoggingInterceptor {
    fn default() -> Self {
        Self {
            max_result_chars: 512,
        }
    }
}

impl LoggingInterceptor {
    pub fn new(max_result_chars: usize) -> Self {
        Self { max_result_chars }
    }
}

impl<T: Debug + Send + Sync + 'static> Interceptor<T> for LoggingInterceptor {
    fn stage(&self) -> Stage {
        Stage::Logging
    }

    fn intercept<'a>(
        &'a self,
        invocation: &'a Invocation,
        next: Next<'a, T>,
    ) -> BoxFuture<'a, Outcome<T>> {
        Box::pin(async move {
            let op = invocation.operation();
            let principal = invocation.principal().map(|p| p.id.to_string());

            info!(
                request_id = %invocation.request_id(),
                component = op.component(),
                operation = op.operation(),
                principal = principal.as_deref().unwrap_or("-"),
                "executing"
            );
            debug!(request_id = %invocation.request_id(), args = %op.args_summary(), "arguments");

            let outcome = next.run(invocation).await;

            match &outcome {
                Outcome::Success(value) => {
                    info!(
                        request_id = %invocation.request_id(),
                        component = op.component(),
                        operation = op.operation(),
                        outcome = outcome.label(),
                        "completed"
                    );
                    match render(value, self.max_result_chars) {
                        Some(rendered) => {
                            debug!(request_id = %invocation.request_id(), result = %rendered, "result")
                        }
                        None => warn!(
                            request_id = %invocation.request_id(),
                            operation = op.operation(),
                            "result could not be rendered for logging"
                        ),
                    }
                }
                Outcome::ShortCircuited { status, reason } => info!(
                    request_id = %invocation.request_id(),
                    component = op.component(),
                    operation = op.operation(),
                    outcome = outcome.label(),
                    status = %status,
                    reason = %reason,
                    "completed"
                ),
                Outcome::Failed(failure) => info!(
                    request_id = %invocation.request_id(),
                    component = op.component(),
                    operation = op.operation(),
                    outcome = outcome.label(),
                    kind = %failure.kind,
                    incident_id = %failure.incident_id,
                    "completed"
                ),
            }

            outcome
        })
    }
}

/// `Debug` rendering cut to `max` chars, or `None` if rendering panicked.
fn render<T: Debug>(value: &T, max: usize) -> Option<String> {
    let rendered = catch_unwind(AssertUnwindSafe(|| format!("{value:?}"))).ok()?;
    Some(truncate(rendered, max))
}

fn truncate(mut s: String, max: usize) -> String {
    if let Some((idx, _)) = s.char_indices().nth(max) {
        s.truncate(idx);
        s.push('…');
    }
    s
}
