//! Order module: the publishing end of the fulfillment pipeline.

pub mod models;
pub mod service;
pub mod store;

pub use models::{CreateOrderRequest, Order, OrderCreatedPayload};
pub use service::{correlation_id_for, create_order};
pub use store::OrderStore;
