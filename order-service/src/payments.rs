//! Consumes payment outcomes published by payment-service.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use shared::{MessagingConfig, PaymentResult};
use tracing::{error, info, warn};

use crate::checkout::{CheckoutOrchestrator, Resolution};
use crate::error::CheckoutError;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct PaymentResultConsumer {
    orchestrator: Arc<CheckoutOrchestrator>,
    retry_backoff: Duration,
    max_backoff: Duration,
}

impl PaymentResultConsumer {
    pub fn new(orchestrator: Arc<CheckoutOrchestrator>) -> Self {
        Self {
            orchestrator,
            retry_backoff: Duration::from_millis(500),
            max_backoff: MAX_BACKOFF,
        }
    }

    /// Linear backoff step between retries, capped at `max_backoff`.
    pub fn with_retry_backoff(mut self, retry_backoff: Duration, max_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self.max_backoff = max_backoff;
        self
    }

    pub fn consumer(brokers: &str, messaging: &MessagingConfig) -> anyhow::Result<StreamConsumer> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", "order-service-payment-results")
            .set("bootstrap.servers", brokers)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .create()?;
        consumer.subscribe(&[&messaging.payment_results_topic])?;
        Ok(consumer)
    }

    /// Offsets are committed only after a message was handled (or judged
    /// unprocessable), so a crash replays it. Replays are harmless because
    /// settling an order is idempotent. A result is never committed while the
    /// order store or ledger is unreachable; `handle_payload` holds the
    /// partition until they recover.
    pub async fn run(&self, consumer: StreamConsumer) {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    match m.payload_view::<str>() {
                        Some(Ok(json_str)) => {
                            if let Err(e) = self.handle_payload(json_str).await {
                                error!("Error handling payment result: {}", e);
                            }
                        }
                        Some(Err(e)) => error!("Error parsing payment result payload: {}", e),
                        None => warn!("Received payment result without payload"),
                    }
                    if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                        error!("Error committing payment result: {}", e);
                    }
                }
                Err(e) => error!("Error receiving payment result: {}", e),
            }
        }
    }

    /// Decodes and applies one message, retrying with capped backoff for as
    /// long as the order store or ledger is unreachable. Only permanent
    /// failures (malformed payload, unknown order) are returned.
    pub async fn handle_payload(&self, payload: &str) -> anyhow::Result<Resolution> {
        let result: PaymentResult = serde_json::from_str(payload)?;
        let mut attempt: u32 = 1;
        loop {
            match self.orchestrator.on_payment_result(result.clone()).await {
                Ok(resolution) => {
                    info!(
                        order_id = %result.order_id,
                        status = %result.status,
                        applied = resolution.is_applied(),
                        "payment result handled"
                    );
                    return Ok(resolution);
                }
                Err(e @ CheckoutError::ServiceUnavailable { .. }) => {
                    let delay = self.retry_backoff.saturating_mul(attempt).min(self.max_backoff);
                    warn!(order_id = %result.order_id, attempt, ?delay, "payment result deferred: {}", e);
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
