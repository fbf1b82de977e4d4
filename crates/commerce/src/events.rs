//! Event catalog.
//!
//! Every event names its wire discriminator explicitly. Payload fields are
//! camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_events::Event;

macro_rules! discriminated {
    ($($ty:ident => $name:literal),* $(,)?) => {
        $(
            impl Event for $ty {
                const DISCRIMINATOR: &'static str = $name;
            }
        )*

        /// Discriminators of every catalog event.
        pub const ALL_DISCRIMINATORS: &[&str] = &[$($name),*];
    };
}

discriminated! {
    CartItemAdded => "CartItemAdded",
    CartItemUpdated => "CartItemUpdated",
    CartItemRemoved => "CartItemRemoved",
    CartCleared => "CartCleared",
    OrderCreated => "OrderCreated",
    OrderStatusUpdated => "OrderStatusUpdated",
    OrderShipped => "OrderShipped",
    ProductCreated => "ProductCreated",
    ProductStockUpdated => "ProductStockUpdated",
    LowStockAlert => "LowStockAlert",
    UserCreated => "UserCreated",
    UserUpdated => "UserUpdated",
    ReviewCreated => "ReviewCreated",
    SupportTicketCreated => "SupportTicketCreated",
    SupportTicketResolved => "SupportTicketResolved",
}

// Cart

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemAdded {
    pub user_id: i64,
    pub product_id: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemUpdated {
    pub user_id: i64,
    pub product_id: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemRemoved {
    pub user_id: i64,
    pub product_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartCleared {
    pub user_id: i64,
}

// Orders

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: i64,
    pub user_id: i64,
    pub total_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusUpdated {
    pub order_id: i64,
    pub new_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderShipped {
    pub order_id: i64,
    pub tracking_number: String,
    pub estimated_delivery_date: DateTime<Utc>,
}

// Products and inventory

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCreated {
    pub product_id: i64,
    pub name: String,
    pub price: f64,
    pub stock_quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductStockUpdated {
    pub product_id: i64,
    pub new_stock_quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStockAlert {
    pub product_id: i64,
    pub current_stock: i32,
    pub threshold_level: i32,
}

// Users

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreated {
    pub user_id: i64,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdated {
    pub user_id: i64,
    pub email: String,
}

// Reviews and support

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCreated {
    pub review_id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub rating: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportTicketCreated {
    pub ticket_id: i64,
    pub user_id: i64,
    pub issue: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportTicketResolved {
    pub ticket_id: i64,
    pub resolution: String,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn discriminators_are_unique() {
        let unique: HashSet<_> = ALL_DISCRIMINATORS.iter().collect();
        assert_eq!(unique.len(), ALL_DISCRIMINATORS.len());
        assert_eq!(ALL_DISCRIMINATORS.len(), 15);
    }

    #[test]
    fn payload_fields_are_camel_case() {
        let json = serde_json::to_value(CartItemAdded {
            user_id: 7,
            product_id: 42,
            quantity: 2,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "userId": 7, "productId": 42, "quantity": 2 }));
    }
}
