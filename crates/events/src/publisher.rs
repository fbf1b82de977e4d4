use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use bazaar_core::EventId;

use crate::channel::{ChannelError, MessageChannel};
use crate::envelope::EventEnvelope;
use crate::event::Event;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl PublishError {
    /// Whether the caller may retry the publish. Publishing is never retried
    /// internally.
    pub fn is_retryable(&self) -> bool {
        match self {
            PublishError::Serialization(_) => false,
            PublishError::Channel(e) => e.is_retryable(),
        }
    }
}

/// Serializes events and hands them to the channel as persistent messages.
///
/// The exchange named in a publish is declared the first time it is used.
pub struct EventPublisher {
    channel: Arc<dyn MessageChannel>,
    declared: Mutex<HashSet<String>>,
}

impl EventPublisher {
    pub fn new(channel: Arc<dyn MessageChannel>) -> Self {
        Self {
            channel,
            declared: Mutex::new(HashSet::new()),
        }
    }

    /// Publish `event` on `exchange` with `routing_key`.
    ///
    /// Returns the id assigned to the event once the channel accepted it.
    #[instrument(skip(self, event), fields(discriminator = E::DISCRIMINATOR))]
    pub async fn publish<E: Event>(
        &self,
        event: &E,
        exchange: &str,
        routing_key: &str,
    ) -> Result<EventId, PublishError> {
        self.ensure_exchange(exchange).await?;

        let envelope = EventEnvelope::seal(event)?;
        let body = envelope.to_bytes()?;

        if let Err(err) = self.channel.publish(exchange, routing_key, body, true).await {
            warn!(event_id = %envelope.id(), error = %err, "event publish failed");
            return Err(err.into());
        }

        info!(event_id = %envelope.id(), "event published");
        Ok(envelope.id())
    }

    async fn ensure_exchange(&self, exchange: &str) -> Result<(), ChannelError> {
        if exchange.is_empty() || self.is_declared(exchange) {
            return Ok(());
        }
        self.channel.declare_exchange(exchange).await?;
        if let Ok(mut declared) = self.declared.lock() {
            declared.insert(exchange.to_string());
        }
        debug!(exchange, "exchange declared");
        Ok(())
    }

    fn is_declared(&self, exchange: &str) -> bool {
        self.declared
            .lock()
            .map(|d| d.contains(exchange))
            .unwrap_or(false)
    }
}
