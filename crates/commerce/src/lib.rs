//! `bazaar-commerce`: the shop's operations and events wired through the
//! interceptor pipeline and the event system.
//!
//! Persistence stays behind the repository traits; everything here is the
//! boundary the cross-cutting core is exercised at.

pub mod cart;
pub mod channels;
pub mod events;
pub mod handlers;
pub mod orders;

pub use cart::{
    CartCommandRepository, CartCommandService, CartItemInput, CartLine, CartQueryRepository,
    CartQueryService, CartResponse,
};
pub use handlers::{LoggingHandler, default_registry};
pub use orders::{OrderLine, OrderQueryRepository, OrderQueryService, OrderSummary};
