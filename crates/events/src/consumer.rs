//! Event consumer / dispatcher.
//!
//! Per delivery:
//!
//! ```text
//! Received → TypeResolved → HandlerFound → Invoked → Acked
//!                                                  ↘ Requeued (attempt < cap)
//!                                                  ↘ DeadLettered (attempt = cap)
//! ```
//!
//! Malformed envelopes, unknown discriminators and payloads that do not
//! decode are poison: they are acked (dropped) and never retried.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use bazaar_core::EventId;

use crate::channel::{ChannelError, Delivery, MessageChannel};
use crate::envelope::EventEnvelope;
use crate::registry::HandlerRegistry;
use crate::retry::RetryPolicy;

/// An exchange/routing-key pair the consumer queue is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub exchange: String,
    pub routing_key: String,
}

impl Binding {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

/// Consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Queue to consume
    pub queue: String,
    /// Bindings declared by `declare_topology`
    pub bindings: Vec<Binding>,
    /// Destination for messages that exhausted their retries
    pub dead_letter_queue: String,
    /// Redelivery policy for failing handlers
    pub retry: RetryPolicy,
    /// Deliveries processed at the same time
    pub concurrency: usize,
    /// Unacked deliveries the channel may push ahead
    pub prefetch: u16,
    /// Upper bound for one handler invocation
    pub handler_timeout: Duration,
    /// Name for logging
    pub name: String,
    /// Events the attempt ledger tracks at most
    pub attempt_ledger_capacity: usize,
    /// Ledger entries unseen for this long are forgotten
    pub attempt_ledger_ttl: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queue: "event_queue".to_string(),
            bindings: Vec::new(),
            dead_letter_queue: "event_queue.dead_letter".to_string(),
            retry: RetryPolicy::default(),
            concurrency: 1,
            prefetch: 10,
            handler_timeout: Duration::from_secs(30),
            name: "event-consumer".to_string(),
            attempt_ledger_capacity: 10_000,
            attempt_ledger_ttl: Duration::from_secs(3600),
        }
    }
}

impl ConsumerConfig {
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_binding(mut self, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        self.bindings.push(Binding::new(exchange, routing_key));
        self
    }

    pub fn with_dead_letter_queue(mut self, queue: impl Into<String>) -> Self {
        self.dead_letter_queue = queue.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_attempt_ledger(mut self, capacity: usize, ttl: Duration) -> Self {
        self.attempt_ledger_capacity = capacity;
        self.attempt_ledger_ttl = ttl;
        self
    }

    fn validate(&self) -> Result<(), ConsumerError> {
        if self.retry.max_attempts == 0 {
            return Err(ConsumerError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConsumerError::InvalidConfig("concurrency must be at least 1".into()));
        }
        if self.attempt_ledger_capacity == 0 {
            return Err(ConsumerError::InvalidConfig(
                "attempt_ledger_capacity must be at least 1".into(),
            ));
        }
        if self.queue.is_empty() || self.dead_letter_queue.is_empty() {
            return Err(ConsumerError::InvalidConfig("queue names must not be empty".into()));
        }
        if self.queue == self.dead_letter_queue {
            return Err(ConsumerError::InvalidConfig(
                "dead-letter queue must differ from the consumed queue".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    #[error("invalid consumer configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("subscription to '{queue}' closed without a shutdown request")]
    SubscriptionClosed { queue: String },

    #[error("consumer task failed: {0}")]
    Task(String),
}

/// Why a delivery was dropped without retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The body is not an event envelope.
    MalformedEnvelope,
    /// No handler is registered for the discriminator.
    UnknownDiscriminator,
    /// The payload does not decode into the handler's event type.
    PayloadMismatch,
}

/// Terminal result of dispatching one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handler succeeded on attempt `attempt`; message removed.
    Acked { attempt: u32 },
    /// Handler failed; message returned to the queue for another attempt.
    Requeued { attempt: u32 },
    /// Poison message; acked without invoking a handler.
    Dropped(DropReason),
    /// Retries exhausted; message moved to the dead-letter queue.
    DeadLettered { attempts: u32 },
}

/// Body published to the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub reason: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
    pub consumer: String,
    pub envelope: EventEnvelope,
}

/// Consumer runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub received: u64,
    pub acked: u64,
    pub requeued: u64,
    pub dropped: u64,
    pub dead_lettered: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    received: AtomicU64,
    acked: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
    dead_lettered: AtomicU64,
}

impl StatsCounters {
    fn record(&self, outcome: &DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Acked { .. } => &self.acked,
            DispatchOutcome::Requeued { .. } => &self.requeued,
            DispatchOutcome::Dropped(_) => &self.dropped,
            DispatchOutcome::DeadLettered { .. } => &self.dead_lettered,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LedgerEntry {
    deliveries: u32,
    last_seen: Instant,
}

/// Deliveries seen per event, for channels that only report `redelivered`.
///
/// Another consumer may finish a message this one requeued, so entries can
/// outlive their message. Once `capacity` is reached, entries unseen for
/// `ttl` are pruned, then the least recently seen one is evicted.
#[derive(Debug)]
struct AttemptLedger {
    entries: Mutex<HashMap<EventId, LedgerEntry>>,
    capacity: usize,
    ttl: Duration,
}

impl AttemptLedger {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
            ttl,
        }
    }

    /// Record one more delivery of `event_id` and return its attempt number,
    /// never lower than what the channel `reported`.
    fn record(&self, event_id: EventId, reported: u32) -> u32 {
        let Ok(mut entries) = self.entries.lock() else {
            return reported;
        };
        let now = Instant::now();
        if !entries.contains_key(&event_id) && entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, e| now.duration_since(e.last_seen) < ttl);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_seen)
                    .map(|(id, _)| *id);
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        let entry = entries.entry(event_id).or_insert(LedgerEntry {
            deliveries: 0,
            last_seen: now,
        });
        entry.deliveries = (entry.deliveries + 1).max(reported);
        entry.last_seen = now;
        entry.deliveries
    }

    fn forget(&self, event_id: EventId) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&event_id);
        }
    }

    fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

/// Dispatches deliveries from one queue to registered handlers.
pub struct EventConsumer {
    channel: Arc<dyn MessageChannel>,
    registry: Arc<HandlerRegistry>,
    config: ConsumerConfig,
    attempts: AttemptLedger,
    stats: StatsCounters,
}

impl EventConsumer {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        registry: Arc<HandlerRegistry>,
        config: ConsumerConfig,
    ) -> Result<Self, ConsumerError> {
        config.validate()?;
        let attempts = AttemptLedger::new(config.attempt_ledger_capacity, config.attempt_ledger_ttl);
        Ok(Self {
            channel,
            registry,
            config,
            attempts,
            stats: StatsCounters::default(),
        })
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats.snapshot()
    }

    /// Declare the consumed queue, the dead-letter queue and every binding.
    pub async fn declare_topology(&self) -> Result<(), ConsumerError> {
        self.channel.declare_queue(&self.config.queue).await?;
        self.channel.declare_queue(&self.config.dead_letter_queue).await?;
        for binding in &self.config.bindings {
            self.channel.declare_exchange(&binding.exchange).await?;
            self.channel
                .bind_queue(&self.config.queue, &binding.exchange, &binding.routing_key)
                .await?;
        }
        info!(
            consumer = %self.config.name,
            queue = %self.config.queue,
            bindings = self.config.bindings.len(),
            "consumer topology declared"
        );
        Ok(())
    }

    /// Run one delivery through the state machine and settle it with the
    /// channel.
    pub async fn dispatch_one(&self, delivery: Delivery) -> DispatchOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        let outcome = self.dispatch(delivery).await;
        self.stats.record(&outcome);
        outcome
    }

    async fn dispatch(&self, delivery: Delivery) -> DispatchOutcome {
        let tag = delivery.tag;

        // Received → TypeResolved
        let envelope = match EventEnvelope::from_bytes(&delivery.body) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(
                    consumer = %self.config.name,
                    delivery_tag = %tag,
                    error = %err,
                    "malformed envelope, dropping"
                );
                self.ack(&delivery).await;
                return DispatchOutcome::Dropped(DropReason::MalformedEnvelope);
            }
        };
        let event_id = envelope.id();

        let Some(handler) = self.registry.resolve(envelope.discriminator()) else {
            warn!(
                consumer = %self.config.name,
                delivery_tag = %tag,
                event_id = %event_id,
                discriminator = envelope.discriminator(),
                "no handler for discriminator, dropping"
            );
            self.ack(&delivery).await;
            return DispatchOutcome::Dropped(DropReason::UnknownDiscriminator);
        };

        let attempt = self.next_attempt(event_id, &delivery);

        // HandlerFound
        let invocation = match handler.prepare(&envelope, attempt) {
            Ok(invocation) => invocation,
            Err(err) => {
                error!(
                    consumer = %self.config.name,
                    delivery_tag = %tag,
                    event_id = %event_id,
                    discriminator = envelope.discriminator(),
                    error = %err,
                    "payload does not match handler, dropping"
                );
                self.forget(event_id);
                self.ack(&delivery).await;
                return DispatchOutcome::Dropped(DropReason::PayloadMismatch);
            }
        };

        // Invoked
        debug!(
            consumer = %self.config.name,
            event_id = %event_id,
            discriminator = envelope.discriminator(),
            handler = handler.handler_name(),
            attempt,
            "invoking handler"
        );
        let guarded = AssertUnwindSafe(invocation).catch_unwind();
        let failure = match tokio::time::timeout(self.config.handler_timeout, guarded).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(err))) => Some(format!("{err:#}")),
            Ok(Err(payload)) => Some(format!(
                "handler panicked: {}",
                panic_message(payload.as_ref())
            )),
            Err(_) => Some(format!(
                "handler timed out after {} ms",
                self.config.handler_timeout.as_millis()
            )),
        };

        let Some(reason) = failure else {
            self.forget(event_id);
            self.ack(&delivery).await;
            info!(
                consumer = %self.config.name,
                event_id = %event_id,
                discriminator = envelope.discriminator(),
                attempt,
                "event handled"
            );
            return DispatchOutcome::Acked { attempt };
        };

        if self.config.retry.should_retry(attempt) {
            warn!(
                consumer = %self.config.name,
                event_id = %event_id,
                discriminator = envelope.discriminator(),
                attempt,
                max_attempts = self.config.retry.max_attempts,
                error = %reason,
                "handler failed, requeueing"
            );
            let delay = self.config.retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.nack_requeue(&delivery).await;
            return DispatchOutcome::Requeued { attempt };
        }

        self.dead_letter(&delivery, envelope, attempt, reason).await
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        envelope: EventEnvelope,
        attempts: u32,
        reason: String,
    ) -> DispatchOutcome {
        let event_id = envelope.id();
        let letter = DeadLetter {
            reason,
            attempts,
            failed_at: Utc::now(),
            consumer: self.config.name.clone(),
            envelope,
        };

        let published = match serde_json::to_vec(&letter) {
            Ok(body) => self
                .channel
                .publish("", &self.config.dead_letter_queue, body, true)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match published {
            Ok(()) => {
                self.forget(event_id);
                self.ack(delivery).await;
                warn!(
                    consumer = %self.config.name,
                    event_id = %event_id,
                    attempts,
                    dead_letter_queue = %self.config.dead_letter_queue,
                    error = %letter.reason,
                    "retries exhausted, message dead-lettered"
                );
                DispatchOutcome::DeadLettered { attempts }
            }
            Err(err) => {
                // Keep the message rather than lose it.
                error!(
                    consumer = %self.config.name,
                    event_id = %event_id,
                    error = %err,
                    "failed to dead-letter message, requeueing"
                );
                self.nack_requeue(delivery).await;
                DispatchOutcome::Requeued { attempt: attempts }
            }
        }
    }

    fn next_attempt(&self, event_id: EventId, delivery: &Delivery) -> u32 {
        let reported = delivery
            .attempt
            .unwrap_or(if delivery.redelivered { 2 } else { 1 });
        self.attempts.record(event_id, reported)
    }

    fn forget(&self, event_id: EventId) {
        self.attempts.forget(event_id);
    }

    fn log_task_failure(&self, joined: Result<DispatchOutcome, JoinError>) {
        if let Err(err) = joined {
            error!(consumer = %self.config.name, error = %err, "dispatch task failed");
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(err) = self.channel.ack(delivery.tag).await {
            error!(
                consumer = %self.config.name,
                delivery_tag = %delivery.tag,
                error = %err,
                "ack failed"
            );
        }
    }

    async fn nack_requeue(&self, delivery: &Delivery) {
        if let Err(err) = self.channel.nack(delivery.tag, true).await {
            error!(
                consumer = %self.config.name,
                delivery_tag = %delivery.tag,
                error = %err,
                "nack failed"
            );
        }
    }

    /// Consume until `shutdown` flips to `true` or the subscription closes.
    ///
    /// On shutdown no new deliveries are taken; in-flight ones run to
    /// completion (bounded by the handler timeout). Anything not yet acked
    /// stays with the channel. A subscription that ends without a shutdown
    /// request is reported as [`ConsumerError::SubscriptionClosed`].
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        let mut subscription = self
            .channel
            .subscribe(&self.config.queue, self.config.prefetch)
            .await?;
        let permits = Arc::new(Semaphore::new(self.config.concurrency));
        let mut in_flight = JoinSet::new();
        let mut closed = false;

        info!(
            consumer = %self.config.name,
            queue = %self.config.queue,
            concurrency = self.config.concurrency,
            "consumer started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                changed = shutdown.changed() => match changed {
                    Ok(()) => continue,
                    Err(_) => break,
                },
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = tokio::select! {
                changed = shutdown.changed() => match changed {
                    Ok(()) => continue,
                    Err(_) => break,
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.log_task_failure(joined);
                    continue;
                }
                delivery = subscription.recv() => delivery,
            };

            let Some(delivery) = delivery else {
                closed = true;
                break;
            };

            let consumer = self.clone();
            in_flight.spawn(async move {
                let outcome = consumer.dispatch_one(delivery).await;
                drop(permit);
                outcome
            });
        }

        // Stop intake before waiting on in-flight work.
        drop(subscription);
        let pending = in_flight.len();
        if pending > 0 {
            info!(consumer = %self.config.name, pending, "waiting for in-flight deliveries");
        }
        while let Some(joined) = in_flight.join_next().await {
            self.log_task_failure(joined);
        }

        if closed {
            error!(
                consumer = %self.config.name,
                queue = %self.config.queue,
                stats = ?self.stats(),
                "subscription closed, consumer stopped"
            );
            return Err(ConsumerError::SubscriptionClosed {
                queue: self.config.queue.clone(),
            });
        }
        info!(consumer = %self.config.name, stats = ?self.stats(), "consumer stopped");
        Ok(())
    }

    /// Start consuming on a background task.
    pub fn spawn(self: Arc<Self>) -> ConsumerHandle {
        let (tx, rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        let consumer = self.clone();
        let join = tokio::spawn(async move {
            let result = consumer.run(rx).await;
            let _ = done_tx.send(true);
            result
        });
        ConsumerHandle {
            shutdown: tx,
            done: done_rx,
            join,
            consumer: self,
        }
    }

    #[cfg(test)]
    fn ledger_len(&self) -> usize {
        self.attempts.len()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Handle to control a running consumer.
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    done: watch::Receiver<bool>,
    join: JoinHandle<Result<(), ConsumerError>>,
    consumer: Arc<EventConsumer>,
}

impl ConsumerHandle {
    /// Get current consumer statistics.
    pub fn stats(&self) -> ConsumerStats {
        self.consumer.stats()
    }

    /// Resolves once the consume loop has ended, for whatever reason.
    pub async fn stopped(&self) {
        let mut done = self.done.clone();
        let _ = done.wait_for(|stopped| *stopped).await;
    }

    /// Stop taking deliveries and wait for in-flight work to finish.
    ///
    /// Returns the loop's own error if it had already ended on its own.
    pub async fn shutdown(self) -> Result<(), ConsumerError> {
        let _ = self.shutdown.send(true);
        match self.join.await {
            Ok(result) => result,
            Err(err) => Err(ConsumerError::Task(err.to_string())),
        }
    }
}
