//! Order queries.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_auth::{CredentialValidator, Role, RoleRequirement};
use bazaar_core::{OperationId, Outcome};
use bazaar_pipeline::{
    CachePolicy, CacheStore, CallContext, Pipeline, PipelineBuilder, PipelineConfig,
};

pub const ADMIN: Role = Role::from_static("Admin");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: i64,
    pub quantity: i32,
    pub unit_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: i64,
    pub user_id: i64,
    pub order_date: DateTime<Utc>,
    pub status: String,
    pub total_amount: f64,
    pub items: Vec<OrderLine>,
}

#[async_trait]
pub trait OrderQueryRepository: Send + Sync {
    async fn get_by_id(&self, order_id: i64) -> anyhow::Result<OrderSummary>;

    async fn get_orders_by_user_id(&self, user_id: i64) -> anyhow::Result<Vec<OrderSummary>>;

    async fn get_all(&self) -> anyhow::Result<Vec<OrderSummary>>;
}

/// Order reads. Listing every order requires the `Admin` role; the other
/// queries accept any authenticated caller.
pub struct OrderQueryService {
    repository: Arc<dyn OrderQueryRepository>,
    single: Pipeline<OrderSummary>,
    by_user: Pipeline<Vec<OrderSummary>>,
    all: Pipeline<Vec<OrderSummary>>,
}

impl OrderQueryService {
    pub const COMPONENT: &'static str = "OrderQueryService";

    pub fn new(
        repository: Arc<dyn OrderQueryRepository>,
        validator: Arc<dyn CredentialValidator>,
        store: Arc<dyn CacheStore>,
        config: PipelineConfig,
    ) -> Self {
        let single = PipelineBuilder::new(config.clone())
            .authorize(validator.clone(), RoleRequirement::authenticated())
            .log()
            .time()
            .cache(store.clone(), CachePolicy::with_prefix("order:"))
            .build();
        let by_user = PipelineBuilder::new(config.clone())
            .authorize(validator.clone(), RoleRequirement::authenticated())
            .log()
            .time()
            .cache(store.clone(), CachePolicy::with_prefix("orders:user:"))
            .build();
        let all = PipelineBuilder::new(config)
            .authorize(validator, RoleRequirement::any_of([ADMIN]))
            .log()
            .time()
            .cache(store, CachePolicy::with_prefix("orders:all"))
            .build();
        Self {
            repository,
            single,
            by_user,
            all,
        }
    }

    pub async fn get_order_by_id(&self, order_id: i64, context: CallContext) -> Outcome<OrderSummary> {
        let repository = &self.repository;
        let operation = OperationId::new(Self::COMPONENT, "get_order_by_id").arg(order_id);
        self.single
            .execute(operation, context, |_| async move {
                repository.get_by_id(order_id).await
            })
            .await
    }

    pub async fn get_orders_by_user_id(
        &self,
        user_id: i64,
        context: CallContext,
    ) -> Outcome<Vec<OrderSummary>> {
        let repository = &self.repository;
        let operation = OperationId::new(Self::COMPONENT, "get_orders_by_user_id").arg(user_id);
        self.by_user
            .execute(operation, context, |_| async move {
                repository.get_orders_by_user_id(user_id).await
            })
            .await
    }

    pub async fn get_all_orders(&self, context: CallContext) -> Outcome<Vec<OrderSummary>> {
        let repository = &self.repository;
        let operation = OperationId::new(Self::COMPONENT, "get_all_orders");
        self.all
            .execute(operation, context, |_| async move { repository.get_all().await })
            .await
    }
}
