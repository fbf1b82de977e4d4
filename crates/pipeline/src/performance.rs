use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use bazaar_core::Outcome;

use crate::interceptor::{BoxFuture, Interceptor, Next, Stage};
use crate::invocation::Invocation;

/// Times the rest of the chain on a monotonic clock.
///
/// Completion is always logged; a separate warning is emitted when the
/// elapsed time is strictly greater than the threshold.
#[derive(Debug, Clone)]
pub struct PerformanceInterceptor {
    slow_threshold: Duration,
}

impl Default for PerformanceInterceptor {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}

impl PerformanceInterceptor {
    pub fn new(slow_threshold: Duration) -> Self {
        Self { slow_threshold }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }
}

impl<T: Send + 'static> Interceptor<T> for PerformanceInterceptor {
    fn stage(&self) -> Stage {
        Stage::Performance
    }

    fn intercept<'a>(
        &'a self,
        invocation: &'a Invocation,
        next: Next<'a, T>,
    ) -> BoxFuture<'a, Outcome<T>> {
        Box::pin(async move {
            let started = Instant::now();
            let outcome = next.run(invocation).await;
            let elapsed = started.elapsed();
            invocation.record_elapsed(elapsed);

            let op = invocation.operation();
            info!(
                request_id = %invocation.request_id(),
                component = op.component(),
                operation = op.operation(),
                elapsed_ms = elapsed.as_millis() as u64,
                outcome = outcome.label(),
                "timed"
            );
            if elapsed > self.slow_threshold {
                warn!(
                    request_id = %invocation.request_id(),
                    component = op.component(),
                    operation = op.operation(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    threshold_ms = self.slow_threshold.as_millis() as u64,
                    "slow call"
                );
            }

            outcome
        })
    }
}
