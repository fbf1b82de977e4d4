//! Response caching keyed by operation identity.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use bazaar_core::{ErrorKind, Failure, OperationId, Outcome};

use crate::cache_store::{CacheError, CacheStore};
use crate::interceptor::{BoxFuture, Interceptor, Next, Stage};
use crate::invocation::Invocation;

/// Key prefix and TTL for one cacheable operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub prefix: String,
    pub ttl: Duration,
}

impl CachePolicy {
    pub fn new(prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            ttl,
        }
    }

    /// Prefix with the default TTL of 300 seconds.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::new(prefix, Duration::from_secs(300))
    }

    pub fn key_for(&self, operation: &OperationId) -> String {
        operation.cache_key(&self.prefix)
    }
}

/// Serves repeated calls from the cache store.
///
/// A hit returns immediately without running the target. Store failures
/// degrade to a miss; only successful outcomes are stored. A cached value
/// that does not decode into the operation's result type is a hard failure.
pub struct CachingInterceptor {
    store: Arc<dyn CacheStore>,
    policy: CachePolicy,
}

impl CachingInterceptor {
    pub fn new(store: Arc<dyn CacheStore>, policy: CachePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Remove the cached result of `operation`, e.g. after a write.
    pub async fn evict(&self, operation: &OperationId) -> Result<(), CacheError> {
        let key = self.policy.key_for(operation);
        self.store.delete(&key).await?;
        debug!(cache_key = %key, "cache entry evicted");
        Ok(())
    }

    async fn lookup(&self, invocation: &Invocation, key: &str) -> Option<Vec<u8>> {
        match self.store.get(key).await {
            Ok(hit) => hit,
            Err(err) => {
                warn!(
                    request_id = %invocation.request_id(),
                    cache_key = %key,
                    error = %err,
                    "cache lookup failed, treating as miss"
                );
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, invocation: &Invocation, key: &str, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    request_id = %invocation.request_id(),
                    cache_key = %key,
                    error = %err,
                    "result not serializable, skipping cache store"
                );
                return;
            }
        };

        if let Err(err) = self.store.set(key, bytes, self.policy.ttl).await {
            warn!(
                request_id = %invocation.request_id(),
                cache_key = %key,
                error = %err,
                "cache store failed"
            );
        }
    }
}

impl<T> Interceptor<T> for CachingInterceptor
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn stage(&self) -> Stage {
        Stage::Caching
    }

    fn intercept<'a>(
        &'a self,
        invocation: &'a Invocation,
        next: Next<'a, T>,
    ) -> BoxFuture<'a, Outcome<T>> {
        Box::pin(async move {
            let key = self.policy.key_for(invocation.operation());

            if let Some(bytes) = self.lookup(invocation, &key).await {
                return match serde_json::from_slice::<T>(&bytes) {
                    Ok(value) => {
                        debug!(request_id = %invocation.request_id(), cache_key = %key, "cache hit");
                        Outcome::Success(value)
                    }
                    Err(err) => {
                        let failure = Failure::new(
                            ErrorKind::Internal,
                            ErrorKind::Internal.user_message(),
                        );
                        error!(
                            request_id = %invocation.request_id(),
                            cache_key = %key,
                            incident_id = %failure.incident_id,
                            expected = std::any::type_name::<T>(),
                            error = %err,
                            "cached value does not match the operation's result type"
                        );
                        Outcome::Failed(failure)
                    }
                };
            }

            debug!(request_id = %invocation.request_id(), cache_key = %key, "cache miss");
            let outcome = next.run(invocation).await;
            if let Outcome::Success(value) = &outcome {
                self.store(invocation, &key, value).await;
            }
            outcome
        })
    }
}
