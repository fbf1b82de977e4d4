//! Cart queries and commands.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use bazaar_auth::{CredentialValidator, RoleRequirement};
use bazaar_core::{OperationId, Outcome, json_arg};
use bazaar_events::EventPublisher;
use bazaar_pipeline::{
    CachePolicy, CacheStore, CachingInterceptor, CallContext, Pipeline, PipelineBuilder,
    PipelineConfig,
};

use crate::channels::{CART_EVENTS, routing};
use crate::events::{CartCleared, CartItemAdded, CartItemRemoved, CartItemUpdated};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartResponse {
    pub user_id: i64,
    pub items: Vec<CartLine>,
    pub total_cents: i64,
}

impl CartResponse {
    pub fn new(user_id: i64, items: Vec<CartLine>) -> Self {
        let total_cents = items
            .iter()
            .map(|line| line.unit_price_cents * i64::from(line.quantity))
            .sum();
        Self {
            user_id,
            items,
            total_cents,
        }
    }

    pub fn empty(user_id: i64) -> Self {
        Self::new(user_id, Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemInput {
    pub product_id: i64,
    pub quantity: i32,
}

#[async_trait]
pub trait CartQueryRepository: Send + Sync {
    async fn get_cart_by_user_id(&self, user_id: i64) -> anyhow::Result<CartResponse>;
}

#[async_trait]
pub trait CartCommandRepository: Send + Sync {
    async fn add_item(&self, user_id: i64, item: &CartItemInput) -> anyhow::Result<CartResponse>;

    async fn update_item(
        &self,
        user_id: i64,
        product_id: i64,
        quantity: i32,
    ) -> anyhow::Result<CartResponse>;

    /// `false` if the cart had no such line.
    async fn remove_item(&self, user_id: i64, product_id: i64) -> anyhow::Result<bool>;

    /// `false` if there was no cart to clear.
    async fn clear_cart(&self, user_id: i64) -> anyhow::Result<bool>;
}

/// Reads carts for any authenticated caller, cached per user for 300 s.
pub struct CartQueryService {
    repository: Arc<dyn CartQueryRepository>,
    pipeline: Pipeline<CartResponse>,
}

impl CartQueryService {
    pub const COMPONENT: &'static str = "CartQueryService";
    pub const CACHE_PREFIX: &'static str = "cart:user:";

    /// The cart cache, shared with [`CartCommandService`] so writes can evict.
    pub fn cache(store: Arc<dyn CacheStore>) -> Arc<CachingInterceptor> {
        Arc::new(CachingInterceptor::new(
            store,
            CachePolicy::with_prefix(Self::CACHE_PREFIX),
        ))
    }

    pub fn new(
        repository: Arc<dyn CartQueryRepository>,
        validator: Arc<dyn CredentialValidator>,
        cache: Arc<CachingInterceptor>,
        config: PipelineConfig,
    ) -> Self {
        let pipeline = PipelineBuilder::new(config)
            .authorize(validator, RoleRequirement::authenticated())
            .log()
            .time()
            .with(cache)
            .build();
        Self {
            repository,
            pipeline,
        }
    }

    fn cart_operation(user_id: i64) -> OperationId {
        OperationId::new(Self::COMPONENT, "get_cart_by_user_id").arg(user_id)
    }

    pub async fn get_cart_by_user_id(
        &self,
        user_id: i64,
        context: CallContext,
    ) -> Outcome<CartResponse> {
        let repository = &self.repository;
        self.pipeline
            .execute(Self::cart_operation(user_id), context, |_| async move {
                repository.get_cart_by_user_id(user_id).await
            })
            .await
    }
}

/// Cart writes. Each successful write evicts the user's cached cart and
/// publishes the matching cart event.
pub struct CartCommandService {
    repository: Arc<dyn CartCommandRepository>,
    publisher: Arc<EventPublisher>,
    cache: Arc<CachingInterceptor>,
    carts: Pipeline<CartResponse>,
    flags: Pipeline<bool>,
}

impl CartCommandService {
    pub const COMPONENT: &'static str = "CartCommandService";

    pub fn new(
        repository: Arc<dyn CartCommandRepository>,
        publisher: Arc<EventPublisher>,
        validator: Arc<dyn CredentialValidator>,
        cache: Arc<CachingInterceptor>,
        config: PipelineConfig,
    ) -> Self {
        let carts = PipelineBuilder::new(config.clone())
            .authorize(validator.clone(), RoleRequirement::authenticated())
            .log()
            .time()
            .build();
        let flags = PipelineBuilder::new(config)
            .authorize(validator, RoleRequirement::authenticated())
            .log()
            .time()
            .build();
        Self {
            repository,
            publisher,
            cache,
            carts,
            flags,
        }
    }

    pub async fn add_item(
        &self,
        user_id: i64,
        item: CartItemInput,
        context: CallContext,
    ) -> Outcome<CartResponse> {
        let operation = OperationId::new(Self::COMPONENT, "add_item")
            .arg(user_id)
            .arg(json_arg(&item));
        self.carts
            .execute(operation, context, |_| async move {
                let cart = self.repository.add_item(user_id, &item).await?;
                self.evict_cart(user_id).await;
                let event = CartItemAdded {
                    user_id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                };
                self.publisher
                    .publish(&event, CART_EVENTS, routing::ITEM_ADDED)
                    .await?;
                Ok::<_, anyhow::Error>(cart)
            })
            .await
    }

    pub async fn update_item(
        &self,
        user_id: i64,
        product_id: i64,
        quantity: i32,
        context: CallContext,
    ) -> Outcome<CartResponse> {
        let operation = OperationId::new(Self::COMPONENT, "update_item")
            .arg(user_id)
            .arg(product_id)
            .arg(quantity);
        self.carts
            .execute(operation, context, |_| async move {
                let cart = self
                    .repository
                    .update_item(user_id, product_id, quantity)
                    .await?;
                self.evict_cart(user_id).await;
                let event = CartItemUpdated {
                    user_id,
                    product_id,
                    quantity,
                };
                self.publisher
                    .publish(&event, CART_EVENTS, routing::ITEM_UPDATED)
                    .await?;
                Ok::<_, anyhow::Error>(cart)
            })
            .await
    }

    pub async fn remove_item(
        &self,
        user_id: i64,
        product_id: i64,
        context: CallContext,
    ) -> Outcome<bool> {
        let operation = OperationId::new(Self::COMPONENT, "remove_item")
            .arg(user_id)
            .arg(product_id);
        self.flags
            .execute(operation, context, |_| async move {
                let removed = self.repository.remove_item(user_id, product_id).await?;
                if removed {
                    self.evict_cart(user_id).await;
                    let event = CartItemRemoved {
                        user_id,
                        product_id,
                    };
                    self.publisher
                        .publish(&event, CART_EVENTS, routing::ITEM_REMOVED)
                        .await?;
                }
                Ok::<_, anyhow::Error>(removed)
            })
            .await
    }

    pub async fn clear_cart(&self, user_id: i64, context: CallContext) -> Outcome<bool> {
        let operation = OperationId::new(Self::COMPONENT, "clear_cart").arg(user_id);
        self.flags
            .execute(operation, context, |_| async move {
                let cleared = self.repository.clear_cart(user_id).await?;
                if cleared {
                    self.evict_cart(user_id).await;
                    self.publisher
                        .publish(&CartCleared { user_id }, CART_EVENTS, routing::CART_CLEARED)
                        .await?;
                }
                Ok::<_, anyhow::Error>(cleared)
            })
            .await
    }

    async fn evict_cart(&self, user_id: i64) {
        let operation = CartQueryService::cart_operation(user_id);
        if let Err(err) = self.cache.evict(&operation).await {
            warn!(user_id, error = %err, "failed to evict cached cart");
        }
    }
}
