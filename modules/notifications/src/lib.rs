//! Notifications module: emails payment confirmations for completed
//! payments.

pub mod consumer_task;
pub mod handlers;
pub mod mailer;
pub mod models;
pub mod store;

pub use consumer_task::{start_payment_processed_consumer, GROUP, QUEUE};
pub use handlers::NotificationHandler;
pub use mailer::{Mailer, MailerError, MockMailer};
pub use models::{Notification, PaymentProcessedPayload};
pub use store::NotificationStore;
