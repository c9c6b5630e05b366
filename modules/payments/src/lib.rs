//! Payments module: captures payment for created orders and chains
//! `payment.processed`.

pub mod consumer_task;
pub mod handlers;
pub mod models;
pub mod processor;
pub mod store;

pub use consumer_task::{start_order_created_consumer, GROUP, QUEUE};
pub use handlers::PaymentHandler;
pub use models::{OrderCreatedPayload, Payment, PaymentProcessedPayload};
pub use processor::{GatewayCapture, GatewayError, MockGateway, PaymentGateway};
pub use store::PaymentStore;
