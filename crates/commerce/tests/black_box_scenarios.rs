use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::subscriber::DefaultGuard;
use tracing::{Event as TracingEvent, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use bazaar_auth::{HmacJwtValidator, JwtSettings, Role};
use bazaar_commerce::channels::{self, routing};
use bazaar_commerce::events::*;
use bazaar_commerce::orders::ADMIN;
use bazaar_commerce::{
    CartCommandRepository, CartCommandService, CartItemInput, CartLine, CartQueryRepository,
    CartQueryService, CartResponse, OrderQueryRepository, OrderQueryService, OrderSummary,
    default_registry,
};
use bazaar_core::{AppError, ErrorKind, Outcome};
use bazaar_events::{
    ConsumerConfig, DispatchOutcome, Event, EventConsumer, EventContext, EventHandler, EventPublisher,
    HandlerRegistry, InMemoryChannel, MessageChannel, RetryPolicy,
};
use bazaar_pipeline::{CacheStore, CallContext, InMemoryCacheStore, PipelineConfig};

const SECRET: &str = "black-box-secret";

fn validator() -> Arc<HmacJwtValidator> {
    Arc::new(HmacJwtValidator::new(JwtSettings::new(SECRET)))
}

fn bearer(roles: Vec<Role>) -> CallContext {
    let token = validator()
        .issue("7", Some("shopper@example.com".into()), roles, Utc::now())
        .unwrap();
    CallContext::bearer(token)
}

fn sample_cart(user_id: i64) -> CartResponse {
    CartResponse::new(
        user_id,
        vec![CartLine {
            product_id: 42,
            product_name: "Espresso beans 1kg".into(),
            quantity: 2,
            unit_price_cents: 1899,
        }],
    )
}

#[derive(Default)]
struct Carts {
    reads: AtomicUsize,
}

#[async_trait]
impl CartQueryRepository for Carts {
    async fn get_cart_by_user_id(&self, user_id: i64) -> anyhow::Result<CartResponse> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if user_id == 404 {
            return Err(AppError::not_found("Cart not found.").into());
        }
        Ok(sample_cart(user_id))
    }
}

#[async_trait]
impl CartCommandRepository for Carts {
    async fn add_item(&self, user_id: i64, item: &CartItemInput) -> anyhow::Result<CartResponse> {
        let mut cart = sample_cart(user_id);
        cart.items[0].product_id = item.product_id;
        cart.items[0].quantity = item.quantity;
        Ok(CartResponse::new(user_id, cart.items))
    }

    async fn update_item(&self, user_id: i64, _: i64, _: i32) -> anyhow::Result<CartResponse> {
        Ok(sample_cart(user_id))
    }

    async fn remove_item(&self, _: i64, _: i64) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn clear_cart(&self, _: i64) -> anyhow::Result<bool> {
        Ok(false)
    }
}

#[derive(Default)]
struct Orders {
    reads: AtomicUsize,
}

#[async_trait]
impl OrderQueryRepository for Orders {
    async fn get_by_id(&self, _: i64) -> anyhow::Result<OrderSummary> {
        panic!("order table unavailable")
    }

    async fn get_orders_by_user_id(&self, _: i64) -> anyhow::Result<Vec<OrderSummary>> {
        Ok(Vec::new())
    }

    async fn get_all(&self) -> anyhow::Result<Vec<OrderSummary>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<(CartItemAdded, u32)>>,
    failures_left: Mutex<u32>,
}

#[async_trait]
impl EventHandler<CartItemAdded> for RecordingHandler {
    async fn handle(&self, event: CartItemAdded, ctx: &EventContext) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push((event, ctx.attempt));
        let mut left = self.failures_left.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            anyhow::bail!("downstream unavailable");
        }
        Ok(())
    }
}

async fn wired_channel() -> Arc<InMemoryChannel> {
    let channel = Arc::new(InMemoryChannel::new());
    for binding in channels::default_bindings() {
        channel.declare_exchange(&binding.exchange).await.unwrap();
    }
    channel
}

fn consumer_config(max_attempts: u32) -> ConsumerConfig {
    channels::default_bindings()
        .into_iter()
        .fold(ConsumerConfig::default(), |cfg, b| {
            cfg.with_binding(b.exchange, b.routing_key)
        })
        .with_retry(RetryPolicy::immediate(max_attempts))
}

async fn emit<E: Event>(publisher: &EventPublisher, event: E, exchange: &str, key: &str) {
    publisher.publish(&event, exchange, key).await.unwrap();
}

/// Dispatch deliveries until one is settled for good.
async fn settle(channel: &InMemoryChannel, consumer: &EventConsumer) -> DispatchOutcome {
    let mut sub = channel.subscribe("event_queue", 1).await.unwrap();
    loop {
        match consumer.dispatch_one(sub.recv().await.unwrap()).await {
            DispatchOutcome::Requeued { .. } => continue,
            settled => return settled,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn cart_lookup_is_served_from_cache_within_ttl() {
    let repo = Arc::new(Carts::default());
    let store = Arc::new(InMemoryCacheStore::new());
    let cache = CartQueryService::cache(store.clone());
    let service = CartQueryService::new(repo.clone(), validator(), cache, PipelineConfig::default());

    let first = service.get_cart_by_user_id(7, bearer(vec![])).await;
    tokio::time::advance(Duration::from_secs(299)).await;
    let second = service.get_cart_by_user_id(7, bearer(vec![])).await;

    assert_eq!(repo.reads.load(Ordering::SeqCst), 1);
    assert_eq!(first, Outcome::Success(sample_cart(7)));
    assert_eq!(first, second);
    assert!(
        store
            .get("cart:user:CartQueryService.get_cart_by_user_id_7")
            .await
            .unwrap()
            .is_some()
    );

    tokio::time::advance(Duration::from_secs(2)).await;
    service.get_cart_by_user_id(7, bearer(vec![])).await;
    assert_eq!(repo.reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn adding_an_item_evicts_the_cart_and_publishes_the_event() {
    let channel = wired_channel().await;
    let repo = Arc::new(Carts::default());
    let cache = CartQueryService::cache(Arc::new(InMemoryCacheStore::new()));
    let cfg = PipelineConfig::default();
    let queries = CartQueryService::new(repo.clone(), validator(), cache.clone(), cfg.clone());
    let commands = CartCommandService::new(
        repo.clone(),
        Arc::new(EventPublisher::new(channel.clone())),
        validator(),
        cache,
        cfg,
    );

    let handler = Arc::new(RecordingHandler::default());
    let registry = HandlerRegistry::builder()
        .register::<CartItemAdded, _>(handler.clone())
        .build()
        .unwrap();
    let consumer = EventConsumer::new(channel.clone(), Arc::new(registry), consumer_config(5)).unwrap();
    consumer.declare_topology().await.unwrap();

    queries.get_cart_by_user_id(7, bearer(vec![])).await;
    let added = commands
        .add_item(
            7,
            CartItemInput {
                product_id: 42,
                quantity: 2,
            },
            bearer(vec![]),
        )
        .await;
    assert!(added.is_success());

    queries.get_cart_by_user_id(7, bearer(vec![])).await;
    assert_eq!(repo.reads.load(Ordering::SeqCst), 2);

    assert_eq!(settle(&channel, &consumer).await, DispatchOutcome::Acked { attempt: 1 });
    let expected = CartItemAdded {
        user_id: 7,
        product_id: 42,
        quantity: 2,
    };
    assert_eq!(*handler.seen.lock().unwrap(), vec![(expected, 1)]);
    assert_eq!(channel.ready_len("event_queue"), 0);
}

#[tokio::test]
async fn admin_only_listing_forbids_other_roles_without_touching_the_repository() {
    let repo = Arc::new(Orders::default());
    let service = OrderQueryService::new(
        repo.clone(),
        validator(),
        Arc::new(InMemoryCacheStore::new()),
        PipelineConfig::default(),
    );

    let outcome = service
        .get_all_orders(bearer(vec![Role::from_static("Customer")]))
        .await;
    assert_eq!(outcome.kind(), Some(ErrorKind::Forbidden));
    assert_eq!(repo.reads.load(Ordering::SeqCst), 0);

    let outcome = service.get_all_orders(bearer(vec![ADMIN])).await;
    assert_eq!(outcome, Outcome::Success(Vec::new()));
    assert_eq!(repo.reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn target_faults_come_back_classified() {
    let cart_repo = Arc::new(Carts::default());
    let carts = CartQueryService::new(
        cart_repo,
        validator(),
        CartQueryService::cache(Arc::new(InMemoryCacheStore::new())),
        PipelineConfig::default(),
    );
    let Outcome::Failed(failure) = carts.get_cart_by_user_id(404, bearer(vec![])).await else {
        panic!("expected a failure");
    };
    assert_eq!(failure.kind, ErrorKind::NotFound);
    assert_eq!(failure.message, "Cart not found.");

    let orders = OrderQueryService::new(
        Arc::new(Orders::default()),
        validator(),
        Arc::new(InMemoryCacheStore::new()),
        PipelineConfig::default(),
    );
    let Outcome::Failed(failure) = orders.get_order_by_id(1, bearer(vec![])).await else {
        panic!("expected a failure");
    };
    assert_eq!(failure.kind, ErrorKind::Internal);
    assert!(failure.cause.is_none());
}

#[derive(Clone, Default)]
struct TargetCounter(Arc<Mutex<Vec<String>>>);

impl<S: Subscriber> Layer<S> for TargetCounter {
    fn on_event(&self, event: &TracingEvent<'_>, _ctx: Context<'_, S>) {
        self.0.lock().unwrap().push(event.metadata().target().to_string());
    }
}

fn capture_targets() -> (TargetCounter, DefaultGuard) {
    let counter = TargetCounter::default();
    let subscriber = tracing_subscriber::registry().with(counter.clone());
    (counter, tracing::subscriber::set_default(subscriber))
}

#[tokio::test]
async fn rejected_credentials_stop_before_inner_stages() {
    let repo = Arc::new(Carts::default());
    let service = CartQueryService::new(
        repo.clone(),
        validator(),
        CartQueryService::cache(Arc::new(InMemoryCacheStore::new())),
        PipelineConfig::default(),
    );
    let expired = validator()
        .issue("7", None, vec![], Utc::now() - chrono::Duration::hours(2))
        .unwrap();

    let (targets, _guard) = capture_targets();
    for context in [
        CallContext::bearer(expired),
        CallContext::bearer("not-a-jwt"),
        CallContext::anonymous(),
    ] {
        let outcome = service.get_cart_by_user_id(7, context).await;
        assert_eq!(outcome.kind(), Some(ErrorKind::Unauthorized));
    }

    let seen = targets.0.lock().unwrap().clone();
    assert!(seen.iter().all(|t| !t.starts_with("bazaar_pipeline::performance")));
    assert!(seen.iter().all(|t| !t.starts_with("bazaar_pipeline::caching")));
    assert_eq!(repo.reads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn every_catalog_event_round_trips_through_the_default_registry() {
    let channel = wired_channel().await;
    let consumer = EventConsumer::new(
        channel.clone(),
        Arc::new(default_registry().unwrap()),
        consumer_config(5),
    )
    .unwrap();
    consumer.declare_topology().await.unwrap();
    let publisher = EventPublisher::new(channel.clone());

    use channels::*;
    use routing::*;
    let now = Utc::now();
    emit(&publisher, CartItemAdded { user_id: 7, product_id: 42, quantity: 2 }, CART_EVENTS, ITEM_ADDED).await;
    emit(&publisher, CartItemUpdated { user_id: 7, product_id: 42, quantity: 3 }, CART_EVENTS, ITEM_UPDATED).await;
    emit(&publisher, CartItemRemoved { user_id: 7, product_id: 42 }, CART_EVENTS, ITEM_REMOVED).await;
    emit(&publisher, CartCleared { user_id: 7 }, CART_EVENTS, CART_CLEARED).await;
    emit(&publisher, OrderCreated { order_id: 1, user_id: 7, total_amount: 37.98 }, ORDER_EVENTS, ORDER_CREATED).await;
    emit(&publisher, OrderStatusUpdated { order_id: 1, new_status: "Paid".into() }, ORDER_EVENTS, ORDER_STATUS_UPDATED).await;
    emit(&publisher, OrderShipped { order_id: 1, tracking_number: "1Z999".into(), estimated_delivery_date: now }, ORDER_EVENTS, ORDER_SHIPPED).await;
    emit(&publisher, ProductCreated { product_id: 42, name: "Beans".into(), price: 18.99, stock_quantity: 10 }, PRODUCT_EVENTS, PRODUCT_CREATED).await;
    emit(&publisher, ProductStockUpdated { product_id: 42, new_stock_quantity: 8 }, PRODUCT_EVENTS, STOCK_UPDATED).await;
    emit(&publisher, LowStockAlert { product_id: 42, current_stock: 2, threshold_level: 5 }, INVENTORY_EVENTS, LOW_STOCK).await;
    emit(&publisher, UserCreated { user_id: 7, email: "a@example.com".into() }, USER_EVENTS, USER_CREATED).await;
    emit(&publisher, UserUpdated { user_id: 7, email: "b@example.com".into() }, USER_EVENTS, USER_UPDATED).await;
    emit(&publisher, ReviewCreated { review_id: 3, user_id: 7, product_id: 42, rating: 5 }, REVIEW_EVENTS, REVIEW_CREATED).await;
    emit(&publisher, SupportTicketCreated { ticket_id: 9, user_id: 7, issue: "late".into() }, SUPPORT_EVENTS, TICKET_CREATED).await;
    emit(&publisher, SupportTicketResolved { ticket_id: 9, resolution: "refunded".into() }, SUPPORT_EVENTS, TICKET_RESOLVED).await;

    let mut sub = channel.subscribe("event_queue", 20).await.unwrap();
    for _ in 0..ALL_DISCRIMINATORS.len() {
        let delivery = sub.recv().await.unwrap();
        assert_eq!(consumer.dispatch_one(delivery).await, DispatchOutcome::Acked { attempt: 1 });
    }
    assert_eq!(consumer.stats().acked, 15);
    assert_eq!(channel.unacked_len(), 0);
}

#[tokio::test]
async fn handler_failing_twice_is_acked_on_third_attempt() {
    let channel = wired_channel().await;
    let handler = Arc::new(RecordingHandler {
        failures_left: Mutex::new(2),
        ..Default::default()
    });
    let registry = HandlerRegistry::builder()
        .register::<CartItemAdded, _>(handler.clone())
        .build()
        .unwrap();
    let consumer = Arc::new(
        EventConsumer::new(channel.clone(), Arc::new(registry), consumer_config(5)).unwrap(),
    );
    consumer.declare_topology().await.unwrap();

    let running = consumer.clone().spawn();
    EventPublisher::new(channel.clone())
        .publish(
            &CartItemAdded {
                user_id: 7,
                product_id: 42,
                quantity: 2,
            },
            channels::CART_EVENTS,
            routing::ITEM_ADDED,
        )
        .await
        .unwrap();

    for _ in 0..200 {
        if running.stats().acked == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    running.shutdown().await.unwrap();

    let attempts: Vec<u32> = handler.seen.lock().unwrap().iter().map(|(_, a)| *a).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert_eq!(consumer.stats().requeued, 2);
    assert_eq!(consumer.stats().acked, 1);
    assert!(channel.drain("event_queue.dead_letter").is_empty());
}

#[tokio::test]
async fn unknown_discriminator_is_removed_from_the_queue() {
    let channel = wired_channel().await;
    let consumer = EventConsumer::new(
        channel.clone(),
        Arc::new(default_registry().unwrap()),
        consumer_config(5),
    )
    .unwrap();
    consumer.declare_topology().await.unwrap();

    let body = serde_json::to_vec(&serde_json::json!({
        "discriminator": "no.such.type",
        "id": "0190f1f6-3c4e-7cc0-8a1e-0f7d5b1c2a33",
        "occurredAt": "2024-07-01T12:00:00Z",
        "payload": { "userId": 7 }
    }))
    .unwrap();
    channel
        .publish(channels::CART_EVENTS, routing::ITEM_ADDED, body, true)
        .await
        .unwrap();

    assert!(matches!(settle(&channel, &consumer).await, DispatchOutcome::Dropped(_)));
    assert_eq!(channel.ready_len("event_queue"), 0);
    assert_eq!(channel.unacked_len(), 0);
    assert_eq!(consumer.stats().requeued, 0);
}
