use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

use bazaar_auth::{CredentialValidator, RoleRequirement};
use bazaar_core::{Environment, OperationId, Outcome};

use crate::authorization::AuthorizationInterceptor;
use crate::boundary::ExceptionBoundary;
use crate::cache_store::CacheStore;
use crate::caching::{CachePolicy, CachingInterceptor};
use crate::interceptor::{BoxFuture, Interceptor, Next, Target};
use crate::invocation::{CallContext, Invocation, TargetContext};
use crate::logging::LoggingInterceptor;
use crate::performance::PerformanceInterceptor;

/// Settings shared by the built-in stages.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub environment: Environment,
    pub slow_threshold: Duration,
    pub max_result_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Production,
            slow_threshold: Duration::from_millis(1000),
            max_result_chars: 512,
        }
    }
}

impl PipelineConfig {
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn with_max_result_chars(mut self, max: usize) -> Self {
        self.max_result_chars = max;
        self
    }
}

/// Assembles the interceptor list for one operation type.
///
/// Interceptors may be added in any order; `build` sorts them by
/// [`Stage`](crate::Stage), keeping insertion order within a stage.
pub struct PipelineBuilder<T> {
    config: PipelineConfig,
    interceptors: Vec<Arc<dyn Interceptor<T>>>,
}

impl<T: Send + Sync + 'static> PipelineBuilder<T> {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            interceptors: Vec::new(),
        }
    }

    pub fn with(mut self, interceptor: Arc<dyn Interceptor<T>>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn authorize(
        self,
        validator: Arc<dyn CredentialValidator>,
        requirement: RoleRequirement,
    ) -> Self {
        self.with(Arc::new(AuthorizationInterceptor::new(validator, requirement)))
    }

    pub fn time(self) -> Self {
        let threshold = self.config.slow_threshold;
        self.with(Arc::new(PerformanceInterceptor::new(threshold)))
    }

    pub fn build(mut self) -> Pipeline<T> {
        self.interceptors.sort_by_key(|i| i.stage());
        Pipeline {
            interceptors: self.interceptors.into(),
            boundary: ExceptionBoundary::new(self.config.environment),
        }
    }
}

impl<T: Debug + Send + Sync + 'static> PipelineBuilder<T> {
    pub fn log(self) -> Self {
        let max = self.config.max_result_chars;
        self.with(Arc::new(LoggingInterceptor::new(max)))
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync + 'static> PipelineBuilder<T> {
    pub fn cache(self, store: Arc<dyn CacheStore>, policy: CachePolicy) -> Self {
        self.with(Arc::new(CachingInterceptor::new(store, policy)))
    }
}

/// An ordered interceptor chain around a guarded target.
///
/// Holds no per-call state; one instance serves any number of concurrent
/// executions.
pub struct Pipeline<T> {
    interceptors: Arc<[Arc<dyn Interceptor<T>>]>,
    boundary: ExceptionBoundary,
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            interceptors: self.interceptors.clone(),
            boundary: self.boundary,
        }
    }
}

impl<T: Send + Sync + 'static> Pipeline<T> {
    /// Run `target` through the chain.
    ///
    /// The target is only invoked if no stage short-circuits; any error or
    /// panic it produces comes back as `Outcome::Failed`.
    pub async fn execute<F, Fut, E>(
        &self,
        operation: OperationId,
        context: CallContext,
        target: F,
    ) -> Outcome<T>
    where
        F: FnOnce(TargetContext) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        E: Into<anyhow::Error>,
    {
        self.execute_observed(operation, context, target).await.0
    }

    /// Like [`execute`](Self::execute), also returning the time recorded by
    /// the performance stage (if one ran).
    pub async fn execute_observed<F, Fut, E>(
        &self,
        operation: OperationId,
        context: CallContext,
        target: F,
    ) -> (Outcome<T>, Option<Duration>)
    where
        F: FnOnce(TargetContext) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        E: Into<anyhow::Error>,
    {
        let invocation = Invocation::new(operation, context);
        let boundary = self.boundary;

        let guarded = guarded_target(move |inv| {
            async move {
                let ctx = TargetContext::from(inv);
                boundary.guard(inv, target(ctx)).await
            }
            .boxed()
        });

        let outcome = Next::new(&self.interceptors, guarded).run(&invocation).await;
        let elapsed = invocation.elapsed();
        (outcome, elapsed)
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

fn guarded_target<'a, T, F>(f: F) -> Target<'a, T>
where
    F: FnOnce(&'a Invocation) -> BoxFuture<'a, Outcome<T>> + Send + 'a,
{
    Box::new(f)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bazaar_core::ErrorKind;

    use super::*;
    use crate::interceptor::Stage;

    /// Records the order in which stages are entered and left.
    struct Recorder {
        stage: Stage,
        name: &'static str,
        trace: Arc<Mutex<Vec<String>>>,
        short_circuit: bool,
    }

    impl Interceptor<u32> for Recorder {
        fn stage(&self) -> Stage {
            self.stage
        }

        fn intercept<'a>(
            &'a self,
            invocation: &'a Invocation,
            next: Next<'a, u32>,
        ) -> BoxFuture<'a, Outcome<u32>> {
            Box::pin(async move {
                self.trace.lock().unwrap().push(format!("{}:in", self.name));
                let out = if self.short_circuit {
                    Outcome::short_circuit(ErrorKind::Forbidden, "stop")
                } else {
                    next.run(invocation).await
                };
                self.trace.lock().unwrap().push(format!("{}:out", self.name));
                out
            })
        }
    }

    fn recorder(
        stage: Stage,
        name: &'static str,
        trace: &Arc<Mutex<Vec<String>>>,
        short_circuit: bool,
    ) -> Arc<dyn Interceptor<u32>> {
        Arc::new(Recorder {
            stage,
            name,
            trace: trace.clone(),
            short_circuit,
        })
    }

    #[tokio::test]
    async fn stages_run_in_fixed_order_regardless_of_insertion() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PipelineBuilder::new(PipelineConfig::default())
            .with(recorder(Stage::Caching, "cache", &trace, false))
            .with(recorder(Stage::Logging, "log", &trace, false))
            .with(recorder(Stage::Authorization, "auth", &trace, false))
            .with(recorder(Stage::Performance, "perf", &trace, false))
            .build();

        let t = trace.clone();
        let out = pipeline
            .execute(OperationId::new("C", "op"), CallContext::anonymous(), |_| async move {
                t.lock().unwrap().push("target".into());
                Ok::<_, anyhow::Error>(5)
            })
            .await;

        assert_eq!(out, Outcome::Success(5));
        assert_eq!(
            *trace.lock().unwrap(),
            [
                "auth:in", "log:in", "perf:in", "cache:in", "target", "cache:out", "perf:out",
                "log:out", "auth:out"
            ]
        );
    }

    #[tokio::test]
    async fn short_circuit_skips_inner_stages_but_outer_after_hooks_run() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PipelineBuilder::new(PipelineConfig::default())
            .with(recorder(Stage::Logging, "log", &trace, false))
            .with(recorder(Stage::Performance, "perf", &trace, true))
            .with(recorder(Stage::Caching, "cache", &trace, false))
            .build();

        let out = pipeline
            .execute(OperationId::new("C", "op"), CallContext::anonymous(), |_| async {
                Ok::<_, anyhow::Error>(1)
            })
            .await;

        assert_eq!(out.kind(), Some(ErrorKind::Forbidden));
        assert_eq!(*trace.lock().unwrap(), ["log:in", "perf:in", "perf:out", "log:out"]);
    }

    #[tokio::test]
    async fn target_faults_reach_outer_stages_as_values() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PipelineBuilder::new(PipelineConfig::default())
            .with(recorder(Stage::Logging, "log", &trace, false))
            .build();

        let out = pipeline
            .execute(OperationId::new("C", "op"), CallContext::anonymous(), |_| async {
                Err::<u32, _>(anyhow::anyhow!("boom"))
            })
            .await;

        assert_eq!(out.kind(), Some(ErrorKind::Internal));
        assert_eq!(*trace.lock().unwrap(), ["log:in", "log:out"]);
    }

    #[tokio::test]
    async fn empty_pipeline_still_guards_the_target() {
        let pipeline = PipelineBuilder::<u32>::new(PipelineConfig::default()).build();
        assert!(pipeline.is_empty());

        let out = pipeline
            .execute(OperationId::new("C", "op"), CallContext::anonymous(), |_| async {
                Err::<u32, _>(bazaar_core::AppError::validation("quantity must be positive"))
            })
            .await;
        assert_eq!(out.kind(), Some(ErrorKind::Validation));
    }
}
