//! Stand-in for an external card processor in local environments.
//!
//! Periodically picks up payments that have been pending for a while and
//! settles them through the same webhook path a real gateway would call,
//! succeeding with a configurable probability.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use shared::PaymentStatus;
use tokio::time;
use tracing::error;

use crate::error::PaymentError;
use crate::publisher::ResultPublisher;
use crate::service::{PaymentService, WebhookNotification};
use crate::store::PaymentStore;

pub struct GatewaySimulator<S, P> {
    service: Arc<PaymentService<S, P>>,
    success_rate: f64,
    settle_after: Duration,
}

impl<S, P> GatewaySimulator<S, P>
where
    S: PaymentStore,
    P: ResultPublisher,
{
    pub fn new(service: Arc<PaymentService<S, P>>, success_rate: f64, settle_after: Duration) -> Self {
        Self {
            service,
            success_rate,
            settle_after,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(Duration::from_secs(1));

        loop {
            interval.tick().await;

            if let Err(e) = self.settle_due().await {
                error!("Error settling simulated payments: {}", e);
            }
        }
    }

    /// Settles every payment pending longer than `settle_after`; returns how
    /// many were settled.
    pub async fn settle_due(&self) -> Result<usize, PaymentError> {
        let settle_after = chrono::Duration::from_std(self.settle_after)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - settle_after;
        let due = self
            .service
            .store()
            .pending_created_before(cutoff, 100)
            .await?;

        let count = due.len();
        for payment in due {
            let succeed = rand::random::<f64>() < self.success_rate;
            let notification = WebhookNotification {
                transaction_ref: payment.transaction_ref,
                status: if succeed {
                    PaymentStatus::Succeeded
                } else {
                    PaymentStatus::Failed
                },
                reason: (!succeed).then(|| "Payment processing failed".to_string()),
            };
            self.service.handle_webhook(notification).await?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::InMemoryResultPublisher;
    use crate::service::InitiatePayment;
    use crate::store::InMemoryPaymentStore;
    use bigdecimal::BigDecimal;
    use uuid::Uuid;

    #[tokio::test]
    async fn settles_pending_payments_with_certain_success() {
        let publisher = InMemoryResultPublisher::new();
        let service = Arc::new(PaymentService::new(
            InMemoryPaymentStore::new(),
            publisher.clone(),
        ));
        service
            .initiate(InitiatePayment {
                order_id: Uuid::new_v4(),
                amount: BigDecimal::from(10),
                payment_method: "card".to_string(),
            })
            .await
            .unwrap();

        let simulator = GatewaySimulator::new(service.clone(), 1.0, Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(simulator.settle_due().await.unwrap(), 1);
        assert_eq!(simulator.settle_due().await.unwrap(), 0);

        let published = publisher.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].status, PaymentStatus::Succeeded);
    }
}
