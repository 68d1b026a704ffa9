//! Payment persistence.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::PaymentStatus;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::PaymentError;
use crate::models::{NewPayment, Payment};
use crate::schema::payments;

pub type DbPool = bb8::Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Stores `payment` unless the order already has one, and returns the
    /// payment on record for the order either way.
    async fn insert_or_existing(&self, payment: NewPayment) -> Result<Payment, PaymentError>;

    async fn find_by_ref(&self, transaction_ref: &str) -> Result<Option<Payment>, PaymentError>;

    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, PaymentError>;

    /// Moves a `PENDING` payment to `status`. Returns the updated payment, or
    /// `None` when the payment was no longer pending.
    async fn complete(
        &self,
        transaction_ref: &str,
        status: PaymentStatus,
        failure_reason: Option<String>,
    ) -> Result<Option<Payment>, PaymentError>;

    async fn pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, PaymentError>;
}

#[derive(Clone)]
pub struct PgPaymentStore {
    pool: DbPool,
}

impl PgPaymentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert_or_existing(&self, payment: NewPayment) -> Result<Payment, PaymentError> {
        let mut conn = self.pool.get().await.map_err(PaymentError::storage)?;
        let inserted = diesel::insert_into(payments::table)
            .values(&payment)
            .on_conflict(payments::order_id)
            .do_nothing()
            .returning(Payment::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?;
        if let Some(inserted) = inserted {
            return Ok(inserted);
        }
        let existing = payments::table
            .filter(payments::order_id.eq(payment.order_id))
            .select(Payment::as_select())
            .first(&mut conn)
            .await?;
        Ok(existing)
    }

    async fn find_by_ref(&self, transaction_ref: &str) -> Result<Option<Payment>, PaymentError> {
        let mut conn = self.pool.get().await.map_err(PaymentError::storage)?;
        let payment = payments::table
            .filter(payments::transaction_ref.eq(transaction_ref))
            .select(Payment::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(payment)
    }

    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, PaymentError> {
        let mut conn = self.pool.get().await.map_err(PaymentError::storage)?;
        let payment = payments::table
            .filter(payments::order_id.eq(order_id))
            .select(Payment::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(payment)
    }

    async fn complete(
        &self,
        transaction_ref: &str,
        status: PaymentStatus,
        failure_reason: Option<String>,
    ) -> Result<Option<Payment>, PaymentError> {
        let mut conn = self.pool.get().await.map_err(PaymentError::storage)?;
        let payment = diesel::update(
            payments::table
                .filter(payments::transaction_ref.eq(transaction_ref))
                .filter(payments::status.eq(PaymentStatus::Pending.as_str())),
        )
        .set((
            payments::status.eq(status.as_str()),
            payments::failure_reason.eq(failure_reason),
            payments::payment_date.eq(Some(Utc::now())),
        ))
        .returning(Payment::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?;
        Ok(payment)
    }

    async fn pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, PaymentError> {
        let mut conn = self.pool.get().await.map_err(PaymentError::storage)?;
        let pending = payments::table
            .filter(payments::status.eq(PaymentStatus::Pending.as_str()))
            .filter(payments::created_at.lt(cutoff))
            .order(payments::created_at.asc())
            .limit(limit)
            .select(Payment::as_select())
            .load(&mut conn)
            .await?;
        Ok(pending)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentStore {
    payments: Arc<Mutex<HashMap<String, Payment>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert_or_existing(&self, payment: NewPayment) -> Result<Payment, PaymentError> {
        let mut payments = self.payments.lock().await;
        if let Some(existing) = payments.values().find(|p| p.order_id == payment.order_id) {
            return Ok(existing.clone());
        }
        if payments.contains_key(&payment.transaction_ref) {
            return Err(PaymentError::storage("duplicate transaction reference"));
        }
        let stored = Payment {
            id: payment.id,
            order_id: payment.order_id,
            transaction_ref: payment.transaction_ref.clone(),
            amount: payment.amount,
            payment_method: payment.payment_method,
            status: payment.status,
            failure_reason: None,
            payment_date: None,
            created_at: Utc::now(),
        };
        payments.insert(payment.transaction_ref, stored.clone());
        Ok(stored)
    }

    async fn find_by_ref(&self, transaction_ref: &str) -> Result<Option<Payment>, PaymentError> {
        Ok(self.payments.lock().await.get(transaction_ref).cloned())
    }

    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, PaymentError> {
        Ok(self
            .payments
            .lock()
            .await
            .values()
            .find(|p| p.order_id == order_id)
            .cloned())
    }

    async fn complete(
        &self,
        transaction_ref: &str,
        status: PaymentStatus,
        failure_reason: Option<String>,
    ) -> Result<Option<Payment>, PaymentError> {
        let mut payments = self.payments.lock().await;
        match payments.get_mut(transaction_ref) {
            Some(payment) if payment.status() == PaymentStatus::Pending => {
                payment.status = status.as_str().to_string();
                payment.failure_reason = failure_reason;
                payment.payment_date = Some(Utc::now());
                Ok(Some(payment.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, PaymentError> {
        let mut pending: Vec<Payment> = self
            .payments
            .lock()
            .await
            .values()
            .filter(|p| p.status() == PaymentStatus::Pending && p.created_at < cutoff)
            .cloned()
            .collect();
        pending.sort_by_key(|p| p.created_at);
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(pending)
    }
}
