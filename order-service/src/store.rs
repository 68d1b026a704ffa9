//! Persistence seam for the order aggregate and the reconciliation queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::ReservationToken;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::order::{Order, OrderStatus};

/// Follow-up work recorded when a compensation or confirmation could not be
/// applied at the time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationAction {
    Release,
    Confirm,
    /// Payment settled for an order that was already cancelled.
    Refund,
}

impl ReconciliationAction {
    pub const ALL: [ReconciliationAction; 3] = [
        ReconciliationAction::Release,
        ReconciliationAction::Confirm,
        ReconciliationAction::Refund,
    ];

    /// Ledger actions the sweeper retries on its own. Refunds wait for an
    /// operator.
    pub const RETRYABLE: [ReconciliationAction; 2] =
        [ReconciliationAction::Release, ReconciliationAction::Confirm];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationAction::Release => "release",
            ReconciliationAction::Confirm => "confirm",
            ReconciliationAction::Refund => "refund",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "release" => Some(ReconciliationAction::Release),
            "confirm" => Some(ReconciliationAction::Confirm),
            "refund" => Some(ReconciliationAction::Refund),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReconciliationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReconciliationFlag {
    pub order_id: Uuid,
    pub action: ReconciliationAction,
    /// `Uuid::nil()` for order-level actions such as refunds.
    pub product_id: Uuid,
    pub quantity: i32,
    pub reason: String,
}

impl NewReconciliationFlag {
    pub fn for_token(action: ReconciliationAction, token: &ReservationToken, reason: impl ToString) -> Self {
        Self {
            order_id: token.order_id,
            action,
            product_id: token.product_id,
            quantity: token.quantity,
            reason: reason.to_string(),
        }
    }

    pub fn refund(order_id: Uuid, reason: impl ToString) -> Self {
        Self {
            order_id,
            action: ReconciliationAction::Refund,
            product_id: Uuid::nil(),
            quantity: 0,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationFlag {
    pub id: Uuid,
    pub order_id: Uuid,
    pub action: ReconciliationAction,
    pub product_id: Uuid,
    pub quantity: i32,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl ReconciliationFlag {
    pub fn token(&self) -> ReservationToken {
        ReservationToken {
            order_id: self.order_id,
            product_id: self.product_id,
            quantity: self.quantity,
        }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order with its items atomically.
    async fn create(&self, order: &Order) -> Result<Uuid, StoreError>;

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Moves the order from `from` to `to` only if it is still in `from`.
    ///
    /// This check-and-set is the claim that decides which of several
    /// concurrent resolvers acts on an order.
    async fn transition(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Order, StoreError>;

    /// Oldest first.
    async fn pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError>;

    /// Records a follow-up action. An identical open flag is reused, so the
    /// returned id may belong to an earlier call.
    async fn flag_for_reconciliation(&self, flag: NewReconciliationFlag) -> Result<Uuid, StoreError>;

    /// Unresolved flags whose action is one of `actions`, oldest first.
    async fn open_reconciliation_flags(
        &self,
        actions: &[ReconciliationAction],
        limit: i64,
    ) -> Result<Vec<ReconciliationFlag>, StoreError>;

    async fn resolve_reconciliation_flag(&self, flag_id: Uuid) -> Result<(), StoreError>;
}

#[derive(Default)]
struct StoreState {
    orders: HashMap<Uuid, Order>,
    flags: Vec<(ReconciliationFlag, bool)>,
}

/// Store kept in process memory. Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<Mutex<StoreState>>,
    fail_creates: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `create` fail with a database error.
    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    /// Rewrites an order's timestamp, for exercising expiry.
    pub async fn backdate(&self, order_id: Uuid, order_time: DateTime<Utc>) {
        if let Some(order) = self.state.lock().await.orders.get_mut(&order_id) {
            order.order_time = order_time;
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: &Order) -> Result<Uuid, StoreError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(StoreError::database("order store is not accepting writes"));
        }
        let mut state = self.state.lock().await;
        if state.orders.contains_key(&order.id) {
            return Err(StoreError::DuplicateOrder(order.id));
        }
        state.orders.insert(order.id, order.clone());
        Ok(order.id)
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }

    async fn transition(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Order, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition { order_id, from, to });
        }
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        if order.status != from {
            return Err(StoreError::StaleTransition {
                order_id,
                expected: from,
                actual: order.status,
                to,
            });
        }
        order.status = to;
        Ok(order.clone())
    }

    async fn pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        let mut due: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.order_time < cutoff)
            .cloned()
            .collect();
        due.sort_by_key(|o| o.order_time);
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn flag_for_reconciliation(&self, flag: NewReconciliationFlag) -> Result<Uuid, StoreError> {
        let mut state = self.state.lock().await;
        let existing = state.flags.iter().find(|(f, resolved)| {
            !resolved
                && f.order_id == flag.order_id
                && f.action == flag.action
                && f.product_id == flag.product_id
        });
        if let Some((f, _)) = existing {
            return Ok(f.id);
        }
        let id = Uuid::new_v4();
        state.flags.push((
            ReconciliationFlag {
                id,
                order_id: flag.order_id,
                action: flag.action,
                product_id: flag.product_id,
                quantity: flag.quantity,
                reason: flag.reason,
                created_at: Utc::now(),
            },
            false,
        ));
        Ok(id)
    }

    async fn open_reconciliation_flags(
        &self,
        actions: &[ReconciliationAction],
        limit: i64,
    ) -> Result<Vec<ReconciliationFlag>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .flags
            .iter()
            .filter(|(f, resolved)| !resolved && actions.contains(&f.action))
            .map(|(f, _)| f.clone())
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn resolve_reconciliation_flag(&self, flag_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some((_, resolved)) = state.flags.iter_mut().find(|(f, _)| f.id == flag_id) {
            *resolved = true;
        }
        Ok(())
    }
}
