//! Payment gateway adapter.
//!
//! Records payments initiated by checkout, receives the card processor's
//! webhook, and forwards terminal outcomes to the order service.

pub mod api;
pub mod error;
pub mod models;
pub mod publisher;
pub mod schema;
pub mod service;
pub mod simulator;
pub mod store;

pub use error::PaymentError;
pub use publisher::{InMemoryResultPublisher, KafkaResultPublisher, ResultPublisher};
pub use service::{InitiatePayment, PaymentService, WebhookNotification, WebhookOutcome};
pub use store::{InMemoryPaymentStore, PaymentStore, PgPaymentStore};
