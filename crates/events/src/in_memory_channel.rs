//! In-memory message channel for tests/dev.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::channel::{ChannelError, Delivery, DeliveryTag, MessageChannel, Subscription};

#[derive(Debug, Clone)]
struct Message {
    body: Vec<u8>,
    deliveries: u32,
}

#[derive(Debug)]
struct ConsumerSlot {
    id: u64,
    sender: mpsc::UnboundedSender<Delivery>,
    prefetch: u16,
    in_flight: usize,
}

#[derive(Debug, Default)]
struct Queue {
    ready: VecDeque<Message>,
    consumers: Vec<ConsumerSlot>,
    next_consumer: usize,
}

#[derive(Debug)]
struct Unacked {
    queue: String,
    consumer: u64,
    message: Message,
}

#[derive(Debug, Default)]
struct State {
    /// exchange -> (routing key, queue) bindings
    exchanges: HashMap<String, HashSet<(String, String)>>,
    queues: HashMap<String, Queue>,
    unacked: HashMap<DeliveryTag, Unacked>,
    next_tag: u64,
    next_consumer_id: u64,
}

/// In-memory direct-exchange channel.
///
/// - No IO
/// - Redelivers on `nack(requeue = true)` at the head of the queue, counting
///   deliveries per message
/// - Unroutable messages are dropped, as a broker does for non-mandatory
///   publishes
#[derive(Debug)]
pub struct InMemoryChannel {
    state: Mutex<State>,
    available: AtomicBool,
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a broker outage: every operation fails while off.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Messages waiting in `queue` (not delivered to any consumer).
    pub fn ready_len(&self, queue: &str) -> usize {
        self.lock()
            .map(|s| s.queues.get(queue).map_or(0, |q| q.ready.len()))
            .unwrap_or(0)
    }

    /// Deliveries handed out but neither acked nor nacked yet.
    pub fn unacked_len(&self) -> usize {
        self.lock().map(|s| s.unacked.len()).unwrap_or(0)
    }

    /// Remove and return every ready message of `queue`.
    pub fn drain(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .map(|mut s| {
                s.queues
                    .get_mut(queue)
                    .map(|q| q.ready.drain(..).map(|m| m.body).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Cancel every subscription of `queue`, as a broker does when the
    /// connection drops. Their unacked deliveries return to the queue.
    pub fn cancel_consumers(&self, queue: &str) {
        if let Ok(mut state) = self.lock() {
            let cancelled: Vec<u64> = state
                .queues
                .get_mut(queue)
                .map(|q| q.consumers.drain(..).map(|c| c.id).collect())
                .unwrap_or_default();
            state.reclaim(queue, &cancelled);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, ChannelError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable("in-memory channel switched off".into()));
        }
        self.state
            .lock()
            .map_err(|_| ChannelError::Protocol("channel lock poisoned".into()))
    }
}

impl State {
    fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, ChannelError> {
        if exchange.is_empty() {
            return Ok(self
                .queues
                .contains_key(routing_key)
                .then(|| routing_key.to_string())
                .into_iter()
                .collect());
        }
        let bindings = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| ChannelError::UnknownExchange(exchange.to_string()))?;
        let mut targets: Vec<String> = bindings
            .iter()
            .filter(|(rk, _)| rk == routing_key)
            .map(|(_, q)| q.clone())
            .collect();
        targets.sort();
        Ok(targets)
    }

    /// Hand ready messages of `queue` to consumers with spare prefetch.
    fn pump(&mut self, queue_name: &str) {
        loop {
            let Some(queue) = self.queues.get_mut(queue_name) else {
                return;
            };
            let gone: Vec<u64> = queue
                .consumers
                .iter()
                .filter(|c| c.sender.is_closed())
                .map(|c| c.id)
                .collect();
            if !gone.is_empty() {
                queue.consumers.retain(|c| !gone.contains(&c.id));
                self.reclaim(queue_name, &gone);
                continue;
            }
            let Some(queue) = self.queues.get_mut(queue_name) else {
                return;
            };
            if queue.ready.is_empty() || queue.consumers.is_empty() {
                return;
            }

            let n = queue.consumers.len();
            let Some(idx) = (0..n)
                .map(|i| (queue.next_consumer + i) % n)
                .find(|&i| queue.consumers[i].in_flight < queue.consumers[i].prefetch as usize)
            else {
                return;
            };
            queue.next_consumer = (idx + 1) % n;

            let Some(mut message) = queue.ready.pop_front() else {
                return;
            };
            message.deliveries += 1;
            self.next_tag += 1;
            let tag = DeliveryTag(self.next_tag);
            let delivery = Delivery {
                body: message.body.clone(),
                tag,
                redelivered: message.deliveries > 1,
                attempt: Some(message.deliveries),
            };

            let slot = &mut queue.consumers[idx];
            if slot.sender.send(delivery).is_err() {
                message.deliveries -= 1;
                queue.ready.push_front(message);
                continue;
            }
            slot.in_flight += 1;
            let consumer = slot.id;
            self.unacked.insert(
                tag,
                Unacked {
                    queue: queue_name.to_string(),
                    consumer,
                    message,
                },
            );
        }
    }

    /// Return unacked deliveries of departed consumers to the head of the
    /// queue, oldest first.
    fn reclaim(&mut self, queue_name: &str, consumers: &[u64]) {
        let mut orphaned: Vec<DeliveryTag> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.queue == queue_name && consumers.contains(&u.consumer))
            .map(|(tag, _)| *tag)
            .collect();
        orphaned.sort_unstable();
        for tag in orphaned.into_iter().rev() {
            if let Some(entry) = self.unacked.remove(&tag) {
                if let Some(queue) = self.queues.get_mut(queue_name) {
                    queue.ready.push_front(entry.message);
                }
            }
        }
    }

    fn settle(&mut self, tag: DeliveryTag) -> Result<Unacked, ChannelError> {
        let entry = self
            .unacked
            .remove(&tag)
            .ok_or(ChannelError::UnknownDeliveryTag(tag))?;
        if let Some(queue) = self.queues.get_mut(&entry.queue) {
            if let Some(slot) = queue.consumers.iter_mut().find(|c| c.id == entry.consumer) {
                slot.in_flight = slot.in_flight.saturating_sub(1);
            }
        }
        Ok(entry)
    }
}

#[async_trait]
impl MessageChannel for InMemoryChannel {
    async fn declare_exchange(&self, exchange: &str) -> Result<(), ChannelError> {
        self.lock()?.exchanges.entry(exchange.to_string()).or_default();
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), ChannelError> {
        self.lock()?.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), ChannelError> {
        let mut state = self.lock()?;
        if !state.queues.contains_key(queue) {
            return Err(ChannelError::UnknownQueue(queue.to_string()));
        }
        state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| ChannelError::UnknownExchange(exchange.to_string()))?
            .insert((routing_key.to_string(), queue.to_string()));
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        _durable: bool,
    ) -> Result<(), ChannelError> {
        let mut state = self.lock()?;
        for queue in state.route(exchange, routing_key)? {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.ready.push_back(Message {
                    body: body.clone(),
                    deliveries: 0,
                });
            }
            state.pump(&queue);
        }
        Ok(())
    }

    async fn subscribe(&self, queue: &str, prefetch: u16) -> Result<Subscription, ChannelError> {
        let mut state = self.lock()?;
        state.next_consumer_id += 1;
        let id = state.next_consumer_id;
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .queues
            .get_mut(queue)
            .ok_or_else(|| ChannelError::UnknownQueue(queue.to_string()))?
            .consumers
            .push(ConsumerSlot {
                id,
                sender: tx,
                prefetch: prefetch.max(1),
                in_flight: 0,
            });
        state.pump(queue);
        Ok(Subscription::new(queue, rx))
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), ChannelError> {
        let mut state = self.lock()?;
        let entry = state.settle(tag)?;
        state.pump(&entry.queue);
        Ok(())
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), ChannelError> {
        let mut state = self.lock()?;
        let entry = state.settle(tag)?;
        if requeue {
            if let Some(q) = state.queues.get_mut(&entry.queue) {
                q.ready.push_front(entry.message);
            }
        }
        state.pump(&entry.queue);
        Ok(())
    }
}
