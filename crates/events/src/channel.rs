//! Message Channel contract (mechanics only).
//!
//! A channel is the durable transport between publishers and consumers. It
//! makes minimal assumptions:
//!
//! - **Direct routing**: exchanges route by exact routing key to bound queues;
//!   the default exchange `""` routes to the queue named by the routing key.
//! - **At-least-once**: a delivery stays owned by its consumer until acked;
//!   a nack with requeue (or a crash) makes it available again.
//! - **Idempotent declaration**: declaring an exchange, queue or binding twice
//!   is a no-op.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Channel-scoped identifier of one delivery, used to ack/nack it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

impl core::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub body: Vec<u8>,
    pub tag: DeliveryTag,
    /// The broker has delivered this message before.
    pub redelivered: bool,
    /// Delivery count (1-based), when the transport reports one.
    pub attempt: Option<u32>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel unavailable: {0}")]
    Unavailable(String),

    #[error("unknown exchange '{0}'")]
    UnknownExchange(String),

    #[error("unknown queue '{0}'")]
    UnknownQueue(String),

    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(DeliveryTag),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ChannelError {
    /// Whether trying the same operation again later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChannelError::Unavailable(_) | ChannelError::Protocol(_))
    }
}

/// A stream of deliveries from one queue.
///
/// Each subscription is consumed by a single task. `recv` returns `None` once
/// the channel side is closed.
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    pub fn new(queue: impl Into<String>, receiver: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            queue: queue.into(),
            receiver,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Wait for the next delivery.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Take a delivery if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }
}

/// Transport-agnostic durable pub/sub channel.
///
/// Implementations provide their own internal concurrency safety; many
/// publishers and consumers share one instance.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn declare_exchange(&self, exchange: &str) -> Result<(), ChannelError>;

    async fn declare_queue(&self, queue: &str) -> Result<(), ChannelError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), ChannelError>;

    /// Hand `body` to the channel. Returns once the channel accepted it, not
    /// once anyone processed it.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        durable: bool,
    ) -> Result<(), ChannelError>;

    /// Start consuming `queue`, with at most `prefetch` unacked deliveries
    /// outstanding.
    async fn subscribe(&self, queue: &str, prefetch: u16) -> Result<Subscription, ChannelError>;

    async fn ack(&self, tag: DeliveryTag) -> Result<(), ChannelError>;

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), ChannelError>;
}
