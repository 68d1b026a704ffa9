use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::{MessagingConfig, PaymentResult};
use tokio::sync::Mutex;

use crate::error::PaymentError;

/// Hands terminal payment outcomes to the order service.
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, result: &PaymentResult) -> Result<(), PaymentError>;
}

/// Publishes results keyed by order id, so every result for one order lands
/// on the same partition and is consumed in order.
pub struct KafkaResultPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaResultPublisher {
    pub fn new(producer: FutureProducer, messaging: &MessagingConfig) -> Self {
        Self {
            producer,
            topic: messaging.payment_results_topic.clone(),
        }
    }

    pub fn producer(brokers: &str, messaging: &MessagingConfig) -> anyhow::Result<FutureProducer> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000");
        for (key, value) in messaging.producer_settings() {
            config.set(key, value);
        }
        Ok(config.create()?)
    }
}

#[async_trait]
impl ResultPublisher for KafkaResultPublisher {
    async fn publish(&self, result: &PaymentResult) -> Result<(), PaymentError> {
        let json =
            serde_json::to_string(result).map_err(|e| PaymentError::Publish(e.to_string()))?;
        let key = result.order_id.to_string();
        let record = FutureRecord::to(&self.topic).payload(&json).key(&key);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| PaymentError::Publish(e.to_string()))?;
        Ok(())
    }
}

/// Collects published results in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryResultPublisher {
    published: Arc<Mutex<Vec<PaymentResult>>>,
}

impl InMemoryResultPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<PaymentResult> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl ResultPublisher for InMemoryResultPublisher {
    async fn publish(&self, result: &PaymentResult) -> Result<(), PaymentError> {
        self.published.lock().await.push(result.clone());
        Ok(())
    }
}
