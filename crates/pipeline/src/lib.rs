//! `bazaar-pipeline`: the interceptor chain every business call runs through.
//!
//! A [`Pipeline`] is built once per operation type at startup from an explicit,
//! ordered list of interceptors:
//!
//! `Authorization → Logging → Performance → Caching → [exception boundary → target]`
//!
//! Every stage returns an [`Outcome`](bazaar_core::Outcome); the exception
//! boundary around the target guarantees outer stages never observe a raw
//! fault.

pub mod authorization;
pub mod boundary;
pub mod cache_store;
pub mod caching;
pub mod interceptor;
pub mod invocation;
pub mod logging;
pub mod performance;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod test_support;

pub use authorization::AuthorizationInterceptor;
pub use boundary::ExceptionBoundary;
pub use cache_store::{CacheError, CacheStore, InMemoryCacheStore};
pub use caching::{CachePolicy, CachingInterceptor};
pub use interceptor::{BoxFuture, Interceptor, Next, Stage};
pub use invocation::{CallContext, Invocation, TargetContext};
pub use logging::LoggingInterceptor;
pub use performance::PerformanceInterceptor;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineConfig};
