//! Payment initiation and webhook handling.
//!
//! A payment is created `PENDING` when checkout initiates it and is moved to a
//! terminal status exactly once, by whichever webhook delivery wins the
//! check-and-set on the row. Every delivery, including duplicates, republishes
//! the recorded outcome: the order service treats results idempotently, and
//! republishing covers a publish that failed after the status was written.

use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use shared::PaymentStatus;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PaymentError;
use crate::models::{NewPayment, Payment};
use crate::publisher::ResultPublisher;
use crate::store::PaymentStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatePayment {
    pub order_id: Uuid,
    pub amount: BigDecimal,
    pub payment_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookNotification {
    pub transaction_ref: String,
    pub status: PaymentStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// This delivery moved the payment to its terminal status.
    Applied(Payment),
    /// The payment was already terminal; nothing changed.
    Duplicate(Payment),
}

impl WebhookOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            WebhookOutcome::Applied(p) | WebhookOutcome::Duplicate(p) => p,
        }
    }
}

pub struct PaymentService<S, P> {
    store: S,
    publisher: P,
}

impl<S, P> PaymentService<S, P>
where
    S: PaymentStore,
    P: ResultPublisher,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self { store, publisher }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records a pending payment for an order and returns it. Repeated calls
    /// for the same order return the payment recorded first.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn initiate(&self, request: InitiatePayment) -> Result<Payment, PaymentError> {
        if request.amount <= BigDecimal::zero() {
            return Err(PaymentError::InvalidAmount);
        }
        if request.payment_method.trim().is_empty() {
            return Err(PaymentError::MissingPaymentMethod);
        }

        if let Some(existing) = self.store.find_by_order(request.order_id).await? {
            info!(transaction_ref = %existing.transaction_ref, "payment already initiated");
            return Ok(existing);
        }

        let id = Uuid::new_v4();
        let payment = self
            .store
            .insert_or_existing(NewPayment {
                id,
                order_id: request.order_id,
                transaction_ref: format!("txn_{}", Uuid::new_v4().simple()),
                amount: request.amount,
                payment_method: request.payment_method,
                status: PaymentStatus::Pending.as_str().to_string(),
            })
            .await?;
        if payment.id != id {
            info!(transaction_ref = %payment.transaction_ref, "payment initiated concurrently");
            return Ok(payment);
        }

        info!(transaction_ref = %payment.transaction_ref, amount = %payment.amount, "payment initiated");
        Ok(payment)
    }

    #[tracing::instrument(skip(self, notification), fields(transaction_ref = %notification.transaction_ref))]
    pub async fn handle_webhook(
        &self,
        notification: WebhookNotification,
    ) -> Result<WebhookOutcome, PaymentError> {
        if !notification.status.is_terminal() {
            return Err(PaymentError::NonTerminalStatus(
                notification.status.to_string(),
            ));
        }

        let reason = match notification.status {
            PaymentStatus::Failed => Some(
                notification
                    .reason
                    .unwrap_or_else(|| "payment declined".to_string()),
            ),
            _ => None,
        };

        let outcome = match self
            .store
            .complete(&notification.transaction_ref, notification.status, reason)
            .await?
        {
            Some(payment) => {
                info!(status = %payment.status, order_id = %payment.order_id, "payment resolved");
                WebhookOutcome::Applied(payment)
            }
            None => {
                let payment = self
                    .store
                    .find_by_ref(&notification.transaction_ref)
                    .await?
                    .ok_or_else(|| {
                        PaymentError::UnknownTransaction(notification.transaction_ref.clone())
                    })?;
                if payment.status() != notification.status {
                    warn!(
                        recorded = %payment.status,
                        received = %notification.status,
                        "conflicting webhook for resolved payment ignored"
                    );
                } else {
                    warn!(status = %payment.status, "duplicate webhook delivery");
                }
                WebhookOutcome::Duplicate(payment)
            }
        };

        if let Some(result) = outcome.payment().to_result() {
            self.publisher.publish(&result).await?;
        }
        Ok(outcome)
    }
}
