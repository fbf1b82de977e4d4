//! Discriminator → handler registry.
//!
//! Built once at process start from explicit registrations and immutable
//! afterwards. Resolution never loads or names types from the wire: an
//! unknown discriminator simply has no handler.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;

use bazaar_core::EventId;

use crate::envelope::EventEnvelope;
use crate::event::Event;

/// Delivery metadata handed to a handler alongside the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    pub event_id: EventId,
    pub occurred_at: DateTime<Utc>,
    /// 1-based delivery attempt.
    pub attempt: u32,
}

/// Processes one event type.
///
/// Handlers must be idempotent: the same event can be delivered more than
/// once.
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync {
    async fn handle(&self, event: E, ctx: &EventContext) -> anyhow::Result<()>;
}

#[async_trait]
impl<E: Event, H: EventHandler<E> + ?Sized> EventHandler<E> for Arc<H> {
    async fn handle(&self, event: E, ctx: &EventContext) -> anyhow::Result<()> {
        (**self).handle(event, ctx).await
    }
}

/// A handler with its event type erased.
pub(crate) trait ErasedHandler: Send + Sync {
    /// Decode the payload into the handler's event type and return the
    /// invocation. A decode error means the message can never succeed.
    fn prepare<'a>(
        &'a self,
        envelope: &EventEnvelope,
        attempt: u32,
    ) -> Result<BoxFuture<'a, anyhow::Result<()>>, serde_json::Error>;

    fn handler_name(&self) -> &'static str;
}

struct Bound<E, H> {
    handler: H,
    _event: PhantomData<fn() -> E>,
}

impl<E: Event, H: EventHandler<E> + 'static> ErasedHandler for Bound<E, H> {
    fn prepare<'a>(
        &'a self,
        envelope: &EventEnvelope,
        attempt: u32,
    ) -> Result<BoxFuture<'a, anyhow::Result<()>>, serde_json::Error> {
        let event: E = envelope.decode()?;
        let ctx = EventContext {
            event_id: envelope.id(),
            occurred_at: envelope.occurred_at(),
            attempt,
        };
        Ok(Box::pin(async move { self.handler.handle(event, &ctx).await }))
    }

    fn handler_name(&self) -> &'static str {
        std::any::type_name::<H>()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("discriminator '{0}' registered more than once")]
    DuplicateDiscriminator(String),
}

/// Collects handler registrations; `build` rejects duplicates.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<&'static str, Arc<dyn ErasedHandler>>,
    duplicates: Vec<&'static str>,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `E::DISCRIMINATOR` to `handler`.
    pub fn register<E, H>(mut self, handler: H) -> Self
    where
        E: Event,
        H: EventHandler<E> + 'static,
    {
        let bound: Arc<dyn ErasedHandler> = Arc::new(Bound {
            handler,
            _event: PhantomData::<fn() -> E>,
        });
        match self.handlers.entry(E::DISCRIMINATOR) {
            Entry::Occupied(_) => self.duplicates.push(E::DISCRIMINATOR),
            Entry::Vacant(slot) => {
                slot.insert(bound);
            }
        }
        self
    }

    pub fn build(self) -> Result<HandlerRegistry, RegistryError> {
        if let Some(dup) = self.duplicates.first() {
            return Err(RegistryError::DuplicateDiscriminator((*dup).to_string()));
        }
        Ok(HandlerRegistry {
            handlers: self.handlers,
        })
    }
}

/// Immutable map from discriminator to handler.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    pub(crate) fn resolve(&self, discriminator: &str) -> Option<&Arc<dyn ErasedHandler>> {
        self.handlers.get(discriminator)
    }

    pub fn contains(&self, discriminator: &str) -> bool {
        self.handlers.contains_key(discriminator)
    }

    /// Registered discriminators, sorted.
    pub fn discriminators(&self) -> Vec<&'static str> {
        let mut all: Vec<&'static str> = self.handlers.keys().copied().collect();
        all.sort_unstable();
        all
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("discriminators", &self.discriminators())
            .finish()
    }
}
