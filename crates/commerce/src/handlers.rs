//! Startup handler registrations.

use std::marker::PhantomData;

use async_trait::async_trait;
use tracing::info;

use bazaar_events::{Event, EventContext, EventHandler, HandlerRegistry, RegistryError};

use crate::events::*;

/// Records each event it receives in the log and succeeds.
pub struct LoggingHandler<E> {
    _event: PhantomData<fn(E)>,
}

impl<E> LoggingHandler<E> {
    pub fn new() -> Self {
        Self {
            _event: PhantomData,
        }
    }
}

impl<E> Default for LoggingHandler<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Event> EventHandler<E> for LoggingHandler<E> {
    async fn handle(&self, event: E, ctx: &EventContext) -> anyhow::Result<()> {
        info!(
            discriminator = E::DISCRIMINATOR,
            event_id = %ctx.event_id,
            occurred_at = %ctx.occurred_at,
            attempt = ctx.attempt,
            payload = ?event,
            "event processed"
        );
        Ok(())
    }
}

/// Registry with a [`LoggingHandler`] for every catalog event.
pub fn default_registry() -> Result<HandlerRegistry, RegistryError> {
    HandlerRegistry::builder()
        .register::<CartItemAdded, _>(LoggingHandler::new())
        .register::<CartItemUpdated, _>(LoggingHandler::new())
        .register::<CartItemRemoved, _>(LoggingHandler::new())
        .register::<CartCleared, _>(LoggingHandler::new())
        .register::<OrderCreated, _>(LoggingHandler::new())
        .register::<OrderStatusUpdated, _>(LoggingHandler::new())
        .register::<OrderShipped, _>(LoggingHandler::new())
        .register::<ProductCreated, _>(LoggingHandler::new())
        .register::<ProductStockUpdated, _>(LoggingHandler::new())
        .register::<LowStockAlert, _>(LoggingHandler::new())
        .register::<UserCreated, _>(LoggingHandler::new())
        .register::<UserUpdated, _>(LoggingHandler::new())
        .register::<ReviewCreated, _>(LoggingHandler::new())
        .register::<SupportTicketCreated, _>(LoggingHandler::new())
        .register::<SupportTicketResolved, _>(LoggingHandler::new())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_the_catalog() {
        let registry = default_registry().unwrap();
        let mut expected = ALL_DISCRIMINATORS.to_vec();
        expected.sort_unstable();
        assert_eq!(registry.discriminators(), expected);
    }
}
