//! Broker naming shared by producers and consumers.
//!
//! Topic names used to be scattered string literals; every service now takes
//! a `MessagingConfig` so the exchange, per-event routing keys and durability
//! are set in one place.

use clap::Args;

use crate::events::OrderEventType;

#[derive(Debug, Clone, Args)]
pub struct MessagingConfig {
    /// Prefix for every order event topic.
    #[arg(long, env = "EVENT_EXCHANGE", default_value = "order-events")]
    pub exchange: String,

    #[arg(long, default_value = "order.created")]
    pub order_created_key: String,

    #[arg(long, default_value = "order.processing")]
    pub order_processing_key: String,

    #[arg(long, default_value = "order.cancelled")]
    pub order_cancelled_key: String,

    #[arg(long, default_value = "order.shipped")]
    pub order_shipped_key: String,

    #[arg(long, default_value = "order.delivered")]
    pub order_delivered_key: String,

    #[arg(long, default_value = "order.returned")]
    pub order_returned_key: String,

    /// Topic the payment service publishes terminal payment outcomes to.
    #[arg(long, env = "PAYMENT_RESULTS_TOPIC", default_value = "payment-results")]
    pub payment_results_topic: String,

    /// Require full acknowledgement and idempotent producers.
    #[arg(long, env = "DURABLE_QUEUES", default_value_t = true, action = clap::ArgAction::Set)]
    pub durable: bool,
}

impl MessagingConfig {
    pub fn routing_key(&self, event_type: OrderEventType) -> &str {
        match event_type {
            OrderEventType::OrderCreated => &self.order_created_key,
            OrderEventType::OrderProcessing => &self.order_processing_key,
            OrderEventType::OrderCancelled => &self.order_cancelled_key,
            OrderEventType::OrderShipped => &self.order_shipped_key,
            OrderEventType::OrderDelivered => &self.order_delivered_key,
            OrderEventType::OrderReturned => &self.order_returned_key,
        }
    }

    pub fn topic_for(&self, event_type: OrderEventType) -> String {
        format!("{}.{}", self.exchange, self.routing_key(event_type))
    }

    /// Producer settings implied by the durability flag.
    pub fn producer_settings(&self) -> Vec<(&'static str, &'static str)> {
        if self.durable {
            vec![("acks", "all"), ("enable.idempotence", "true")]
        } else {
            vec![("acks", "1")]
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            exchange: "order-events".to_string(),
            order_created_key: "order.created".to_string(),
            order_processing_key: "order.processing".to_string(),
            order_cancelled_key: "order.cancelled".to_string(),
            order_shipped_key: "order.shipped".to_string(),
            order_delivered_key: "order.delivered".to_string(),
            order_returned_key: "order.returned".to_string(),
            payment_results_topic: "payment-results".to_string(),
            durable: true,
        }
    }
}
