//! `bazaar-events`: domain events over a durable message channel.
//!
//! Producers hand an [`Event`] to the [`EventPublisher`], which wraps it in an
//! [`EventEnvelope`] and publishes it on a named exchange. The
//! [`EventConsumer`] pulls deliveries from a queue, resolves the envelope's
//! discriminator against the [`HandlerRegistry`], decodes the payload into the
//! handler's event type and acks, requeues or dead-letters the delivery.
//!
//! Delivery is at-least-once: handlers must tolerate duplicates.

pub mod channel;
pub mod consumer;
pub mod envelope;
pub mod event;
pub mod in_memory_channel;
pub mod publisher;
pub mod registry;
pub mod retry;

pub use channel::{ChannelError, Delivery, DeliveryTag, MessageChannel, Subscription};
pub use consumer::{
    Binding, ConsumerConfig, ConsumerError, ConsumerHandle, ConsumerStats, DeadLetter,
    DispatchOutcome, DropReason, EventConsumer,
};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_channel::InMemoryChannel;
pub use publisher::{EventPublisher, PublishError};
pub use registry::{EventContext, EventHandler, HandlerRegistry, HandlerRegistryBuilder, RegistryError};
pub use retry::{BackoffStrategy, RetryPolicy};
