//! Services the checkout flow calls out to, plus in-memory doubles.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use shared::OrderEvent;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::CollaboratorError;

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Current unit price. Unknown products are `CollaboratorError::NotFound`.
    async fn price(&self, product_id: Uuid) -> Result<BigDecimal, CollaboratorError>;

    async fn exists(&self, product_id: Uuid) -> Result<bool, CollaboratorError> {
        match self.price(product_id).await {
            Ok(_) => Ok(true),
            Err(CollaboratorError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn exists(&self, user_id: Uuid) -> Result<bool, CollaboratorError>;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Starts an asynchronous charge and returns the processor's reference.
    /// The outcome arrives later as a `PaymentResult`.
    async fn initiate(
        &self,
        order_id: Uuid,
        amount: &BigDecimal,
        payment_method: &str,
    ) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OrderEvent) -> Result<(), CollaboratorError>;
}

#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    prices: Arc<std::sync::RwLock<HashMap<Uuid, BigDecimal>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(self, product_id: Uuid, price: BigDecimal) -> Self {
        self.set_price(product_id, price);
        self
    }

    pub fn set_price(&self, product_id: Uuid, price: BigDecimal) {
        if let Ok(mut prices) = self.prices.write() {
            prices.insert(product_id, price);
        }
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn price(&self, product_id: Uuid) -> Result<BigDecimal, CollaboratorError> {
        let prices = self
            .prices
            .read()
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        prices
            .get(&product_id)
            .cloned()
            .ok_or(CollaboratorError::NotFound)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<std::sync::RwLock<HashSet<Uuid>>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user_id: Uuid) -> Self {
        if let Ok(mut users) = self.users.write() {
            users.insert(user_id);
        }
        self
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn exists(&self, user_id: Uuid) -> Result<bool, CollaboratorError> {
        let users = self
            .users
            .read()
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        Ok(users.contains(&user_id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPayment {
    pub order_id: Uuid,
    pub amount: BigDecimal,
    pub payment_method: String,
    pub transaction_ref: String,
}

/// Gateway double that records initiations and can be told to fail or stall.
#[derive(Clone, Default)]
pub struct InMemoryPaymentGateway {
    initiated: Arc<Mutex<Vec<RecordedPayment>>>,
    failing: Arc<AtomicBool>,
    delay: Arc<std::sync::Mutex<Option<Duration>>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.delay.lock() {
            *slot = delay;
        }
    }

    pub async fn initiated(&self) -> Vec<RecordedPayment> {
        self.initiated.lock().await.clone()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn initiate(
        &self,
        order_id: Uuid,
        amount: &BigDecimal,
        payment_method: &str,
    ) -> Result<String, CollaboratorError> {
        let delay = self.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Rejected("card declined at initiation".to_string()));
        }
        let transaction_ref = format!("txn_{}", order_id.simple());
        self.initiated.lock().await.push(RecordedPayment {
            order_id,
            amount: amount.clone(),
            payment_method: payment_method.to_string(),
            transaction_ref: transaction_ref.clone(),
        });
        Ok(transaction_ref)
    }
}

#[derive(Clone, Default)]
pub struct RecordingEventPublisher {
    events: Arc<Mutex<Vec<OrderEvent>>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<OrderEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), CollaboratorError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
