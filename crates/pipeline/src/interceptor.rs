use std::sync::Arc;

use bazaar_core::Outcome;

use crate::invocation::Invocation;

pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;

/// Position of an interceptor in the chain. Lower stages run first (outermost).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Authorization,
    Logging,
    Performance,
    Caching,
}

/// A single cross-cutting behavior wrapped around an operation.
///
/// An interceptor runs its "before" work, then either calls [`Next::run`] to
/// continue inward or returns its own outcome to short-circuit. Whatever it
/// does after `run` returns is its "after" work; it sees every outcome,
/// including failures, as a value.
pub trait Interceptor<T>: Send + Sync {
    fn stage(&self) -> Stage;

    fn intercept<'a>(&'a self, invocation: &'a Invocation, next: Next<'a, T>)
    -> BoxFuture<'a, Outcome<T>>;
}

pub(crate) type Target<'a, T> =
    Box<dyn FnOnce(&'a Invocation) -> BoxFuture<'a, Outcome<T>> + Send + 'a>;

/// The remainder of the chain, ending at the guarded target.
pub struct Next<'a, T> {
    chain: &'a [Arc<dyn Interceptor<T>>],
    target: Target<'a, T>,
}

impl<'a, T: Send + 'a> Next<'a, T> {
    pub(crate) fn new(chain: &'a [Arc<dyn Interceptor<T>>], target: Target<'a, T>) -> Self {
        Self { chain, target }
    }

    /// Continue with the next interceptor, or the target when none remain.
    pub fn run(self, invocation: &'a Invocation) -> BoxFuture<'a, Outcome<T>> {
        match self.chain.split_first() {
            Some((head, rest)) => head.intercept(invocation, Next::new(rest, self.target)),
            None => (self.target)(invocation),
        }
    }
}
