//! Exchange and routing-key names shared by producers and the worker.

use bazaar_events::Binding;

pub const CART_EVENTS: &str = "cart_events";
pub const ORDER_EVENTS: &str = "order_events";
pub const PRODUCT_EVENTS: &str = "product_events";
pub const INVENTORY_EVENTS: &str = "inventory_events";
pub const USER_EVENTS: &str = "user_events";
pub const REVIEW_EVENTS: &str = "review_events";
pub const SUPPORT_EVENTS: &str = "customer_support_events";

pub mod routing {
    pub const ITEM_ADDED: &str = "item_added";
    pub const ITEM_UPDATED: &str = "item_updated";
    pub const ITEM_REMOVED: &str = "item_removed";
    pub const CART_CLEARED: &str = "cart_cleared";
    pub const ORDER_CREATED: &str = "order_created";
    pub const ORDER_STATUS_UPDATED: &str = "order_status_updated";
    pub const ORDER_SHIPPED: &str = "order_shipped";
    pub const PRODUCT_CREATED: &str = "product_created";
    pub const STOCK_UPDATED: &str = "stock_updated";
    pub const LOW_STOCK: &str = "low_stock";
    pub const USER_CREATED: &str = "user_created";
    pub const USER_UPDATED: &str = "user_updated";
    pub const REVIEW_CREATED: &str = "review_created";
    pub const TICKET_CREATED: &str = "ticket_created";
    pub const TICKET_RESOLVED: &str = "ticket_resolved";
}

/// Every exchange/routing-key pair the catalog is published on.
pub fn default_bindings() -> Vec<Binding> {
    use routing::*;

    [
        (CART_EVENTS, ITEM_ADDED),
        (CART_EVENTS, ITEM_UPDATED),
        (CART_EVENTS, ITEM_REMOVED),
        (CART_EVENTS, CART_CLEARED),
        (ORDER_EVENTS, ORDER_CREATED),
        (ORDER_EVENTS, ORDER_STATUS_UPDATED),
        (ORDER_EVENTS, ORDER_SHIPPED),
        (PRODUCT_EVENTS, PRODUCT_CREATED),
        (PRODUCT_EVENTS, STOCK_UPDATED),
        (INVENTORY_EVENTS, LOW_STOCK),
        (USER_EVENTS, USER_CREATED),
        (USER_EVENTS, USER_UPDATED),
        (REVIEW_EVENTS, REVIEW_CREATED),
        (SUPPORT_EVENTS, TICKET_CREATED),
        (SUPPORT_EVENTS, TICKET_RESOLVED),
    ]
    .into_iter()
    .map(|(exchange, key)| Binding::new(exchange, key))
    .collect()
}
