//! Checkout saga: reserve stock, record the order, start payment, and settle
//! the order once the payment outcome arrives.
//!
//! Reservations are the only step with side effects before the order exists,
//! so they are compensated (released in reverse order) whenever a later step
//! fails. After the order is recorded, every resolver (payment webhook, expiry
//! sweep, user cancel) first claims the order with a status check-and-set and
//! only the winner touches the ledger.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    InventoryLedger, OrderEvent, OrderEventType, PaymentResult, PaymentStatus, ReservationToken,
    ResolveOutcome,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collaborators::{EventPublisher, PaymentGateway, ProductCatalog, UserDirectory};
use crate::error::{CheckoutError, CollaboratorError, StoreError};
use crate::order::{Order, OrderItem, OrderStatus};
use crate::store::{NewReconciliationFlag, OrderStore, ReconciliationAction};

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Upper bound on every individual collaborator call.
    pub call_timeout: Duration,
    /// How long an unpaid order may hold its reservations.
    pub reservation_hold: Duration,
    /// Orders or flags handled per sweep pass.
    pub sweep_batch: i64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            reservation_hold: Duration::from_secs(15 * 60),
            sweep_batch: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub items: Vec<CheckoutLine>,
    pub shipping_address: String,
    pub payment_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub order: Order,
    /// `None` when payment could not be started and the order was cancelled.
    pub transaction_ref: Option<String>,
}

/// Result of an operation that resolves a pending order.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// This call won the claim and applied its side effects.
    Applied(Order),
    /// The order had already left the expected status; nothing was done.
    AlreadyResolved(Order),
}

impl Resolution {
    pub fn order(&self) -> &Order {
        match self {
            Resolution::Applied(order) | Resolution::AlreadyResolved(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            Resolution::Applied(order) | Resolution::AlreadyResolved(order) => order,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Resolution::Applied(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancellationReason {
    PaymentFailed(Option<String>),
    PaymentNotStarted(String),
    Expired,
    UserRequested,
}

impl std::fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancellationReason::PaymentFailed(Some(reason)) => write!(f, "payment failed: {reason}"),
            CancellationReason::PaymentFailed(None) => f.write_str("payment failed"),
            CancellationReason::PaymentNotStarted(reason) => {
                write!(f, "payment could not be started: {reason}")
            }
            CancellationReason::Expired => f.write_str("reservation hold expired"),
            CancellationReason::UserRequested => f.write_str("cancelled by user"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub resolved: usize,
    pub still_open: usize,
}

enum Claim {
    Won(Order),
    Lost(Order),
}

pub struct CheckoutOrchestrator {
    store: Arc<dyn OrderStore>,
    ledger: Arc<dyn InventoryLedger>,
    catalog: Arc<dyn ProductCatalog>,
    users: Arc<dyn UserDirectory>,
    payments: Arc<dyn PaymentGateway>,
    events: Arc<dyn EventPublisher>,
    config: CheckoutConfig,
}

impl CheckoutOrchestrator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        ledger: Arc<dyn InventoryLedger>,
        catalog: Arc<dyn ProductCatalog>,
        users: Arc<dyn UserDirectory>,
        payments: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventPublisher>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            catalog,
            users,
            payments,
            events,
            config,
        }
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    pub async fn order(&self, order_id: Uuid) -> Result<Order, CheckoutError> {
        self.within("order store", self.store.get(order_id))
            .await??
            .ok_or(CheckoutError::OrderNotFound(order_id))
    }

    /// Runs the forward half of the saga and returns without waiting for the
    /// payment outcome.
    #[tracing::instrument(skip_all, fields(user_id = %request.user_id, order_id = tracing::field::Empty))]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt, CheckoutError> {
        // 0. Validate and price the cart before touching the ledger
        let lines = merge_lines(&request)?;
        self.ensure_user(request.user_id).await?;
        let mut items = Vec::with_capacity(lines.len());
        for (product_id, quantity) in lines {
            let price_at_time_of_order = self.price(product_id).await?;
            items.push(OrderItem {
                product_id,
                quantity,
                price_at_time_of_order,
            });
        }

        let order = Order::pending(
            Uuid::new_v4(),
            request.user_id,
            items,
            request.shipping_address,
            request.payment_method,
        );
        tracing::Span::current().record("order_id", tracing::field::display(order.id));

        // 1-2. Reserve in ascending product order, unwinding on the first failure
        self.reserve_all(&order).await?;

        // 3. Record the order; reservations are released if that fails
        let created = self.within("order store", self.store.create(&order)).await;
        if let Err(err) = flatten(created) {
            error!(order_id = %order.id, error = %err, "failed to record order, releasing reservations");
            self.release_all(&order.reservation_tokens(), "order could not be recorded")
                .await;
            return Err(err);
        }
        info!(order_id = %order.id, total = %order.total_amount, "order created");
        self.emit(&order, OrderEventType::OrderCreated, None).await;

        // 4-5. Start payment; the outcome arrives through `on_payment_result`
        let initiated = self
            .within(
                "payment gateway",
                self.payments
                    .initiate(order.id, &order.total_amount, &order.payment_method),
            )
            .await
            .and_then(|r| r.map_err(|e| collaborator("payment gateway", e)));

        match initiated {
            Ok(transaction_ref) => {
                info!(order_id = %order.id, %transaction_ref, "payment initiated");
                Ok(CheckoutReceipt {
                    order,
                    transaction_ref: Some(transaction_ref),
                })
            }
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "payment initiation failed, cancelling order");
                let resolution = self
                    .cancel_with(order.id, CancellationReason::PaymentNotStarted(err.to_string()))
                    .await?;
                Ok(CheckoutReceipt {
                    order: resolution.into_order(),
                    transaction_ref: None,
                })
            }
        }
    }

    /// Applies a terminal payment outcome. Safe to call any number of times
    /// with the same result.
    #[tracing::instrument(skip_all, fields(order_id = %result.order_id, status = %result.status))]
    pub async fn on_payment_result(&self, result: PaymentResult) -> Result<Resolution, CheckoutError> {
        match result.status {
            PaymentStatus::Succeeded => self.settle_paid(result.order_id, &result.transaction_ref).await,
            PaymentStatus::Failed => {
                self.cancel_with(result.order_id, CancellationReason::PaymentFailed(result.reason))
                    .await
            }
            PaymentStatus::Pending => Err(CheckoutError::Validation(
                "payment result is not terminal".to_string(),
            )),
        }
    }

    /// User-initiated cancellation. Only a `PENDING` order can be cancelled;
    /// cancelling an already cancelled order is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: Uuid) -> Result<Resolution, CheckoutError> {
        let resolution = self
            .cancel_with(order_id, CancellationReason::UserRequested)
            .await?;
        match &resolution {
            Resolution::AlreadyResolved(order) if order.status != OrderStatus::Cancelled => {
                Err(CheckoutError::InvalidTransition {
                    order_id,
                    actual: order.status,
                    to: OrderStatus::Cancelled,
                })
            }
            _ => Ok(resolution),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn ship(&self, order_id: Uuid) -> Result<Order, CheckoutError> {
        self.advance(order_id, OrderStatus::Processing, OrderStatus::Shipped, OrderEventType::OrderShipped)
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn deliver(&self, order_id: Uuid) -> Result<Order, CheckoutError> {
        self.advance(order_id, OrderStatus::Shipped, OrderStatus::Delivered, OrderEventType::OrderDelivered)
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_returned(&self, order_id: Uuid) -> Result<Order, CheckoutError> {
        self.advance(order_id, OrderStatus::Processing, OrderStatus::Returned, OrderEventType::OrderReturned)
            .await
    }

    /// Cancels pending orders whose reservation hold elapsed before `now`.
    /// Races with late payment results are settled by the claim.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<SweepReport, CheckoutError> {
        let hold = chrono::Duration::from_std(self.config.reservation_hold)
            .map_err(|e| CheckoutError::Validation(e.to_string()))?;
        let due = self
            .within(
                "order store",
                self.store.pending_older_than(now - hold, self.config.sweep_batch),
            )
            .await??;

        let mut report = SweepReport {
            examined: due.len(),
            ..SweepReport::default()
        };
        for order in due {
            match self.cancel_with(order.id, CancellationReason::Expired).await {
                Ok(Resolution::Applied(_)) => report.expired += 1,
                Ok(Resolution::AlreadyResolved(order)) => {
                    debug!(order_id = %order.id, status = %order.status, "order settled before expiry")
                }
                Err(e) => error!(order_id = %order.id, error = %e, "failed to expire order"),
            }
        }
        if report.expired > 0 {
            info!(expired = report.expired, "expired stale orders");
        }
        Ok(report)
    }

    /// Retries ledger actions that previously failed. Release and confirm are
    /// idempotent, so a flag whose action already landed resolves cleanly.
    /// Refund flags are never fetched here; they stay open for an operator.
    pub async fn reconcile(&self) -> Result<ReconcileReport, CheckoutError> {
        let flags = self
            .within(
                "order store",
                self.store.open_reconciliation_flags(
                    &ReconciliationAction::RETRYABLE,
                    self.config.sweep_batch,
                ),
            )
            .await??;

        let mut report = ReconcileReport::default();
        for flag in flags {
            let token = flag.token();
            let attempt = match flag.action {
                ReconciliationAction::Release => {
                    self.within("inventory", self.ledger.release(&token)).await
                }
                ReconciliationAction::Confirm => {
                    self.within("inventory", self.ledger.confirm_deduct(&token)).await
                }
                ReconciliationAction::Refund => continue,
            };

            match attempt.map(|r| r.map_err(CheckoutError::from)) {
                Ok(Ok(_)) => {
                    self.within("order store", self.store.resolve_reconciliation_flag(flag.id))
                        .await??;
                    info!(flag_id = %flag.id, order_id = %flag.order_id, action = %flag.action, "reconciliation flag resolved");
                    report.resolved += 1;
                }
                Ok(Err(e)) | Err(e) => {
                    warn!(flag_id = %flag.id, action = %flag.action, error = %e, "reconciliation retry failed");
                    report.still_open += 1;
                }
            }
        }
        Ok(report)
    }

    async fn settle_paid(&self, order_id: Uuid, transaction_ref: &str) -> Result<Resolution, CheckoutError> {
        // 6. Claim, then turn every reservation into a permanent deduction
        let order = match self
            .claim(order_id, OrderStatus::Pending, OrderStatus::Processing)
            .await?
        {
            Claim::Won(order) => order,
            Claim::Lost(order) => {
                if order.status == OrderStatus::Cancelled {
                    error!(%order_id, %transaction_ref, "payment succeeded for a cancelled order, flagging refund");
                    self.flag(NewReconciliationFlag::refund(
                        order_id,
                        format!("payment {transaction_ref} settled after cancellation"),
                    ))
                    .await;
                } else {
                    warn!(%order_id, status = %order.status, "duplicate payment success ignored");
                }
                return Ok(Resolution::AlreadyResolved(order));
            }
        };

        for token in order.reservation_tokens() {
            match self.within("inventory", self.ledger.confirm_deduct(&token)).await {
                Ok(Ok(outcome)) => log_resolution("confirmed", &token, outcome),
                Ok(Err(e)) => self.flag_token(ReconciliationAction::Confirm, &token, e).await,
                Err(e) => self.flag_token(ReconciliationAction::Confirm, &token, e).await,
            }
        }
        info!(%order_id, %transaction_ref, "order paid");
        self.emit(&order, OrderEventType::OrderProcessing, None).await;
        Ok(Resolution::Applied(order))
    }

    async fn cancel_with(
        &self,
        order_id: Uuid,
        reason: CancellationReason,
    ) -> Result<Resolution, CheckoutError> {
        // 7. Claim, then hand every reservation back
        let order = match self
            .claim(order_id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await?
        {
            Claim::Won(order) => order,
            Claim::Lost(order) => {
                warn!(%order_id, status = %order.status, %reason, "order already resolved, cancellation ignored");
                return Ok(Resolution::AlreadyResolved(order));
            }
        };

        let tokens = order.reservation_tokens();
        self.release_all(&tokens, &reason.to_string()).await;
        info!(%order_id, %reason, "order cancelled");
        self.emit(&order, OrderEventType::OrderCancelled, Some(reason.to_string()))
            .await;
        Ok(Resolution::Applied(order))
    }

    async fn advance(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        event_type: OrderEventType,
    ) -> Result<Order, CheckoutError> {
        let order = self
            .within("order store", self.store.transition(order_id, from, to))
            .await??;
        info!(%order_id, %from, %to, "order advanced");
        self.emit(&order, event_type, None).await;
        Ok(order)
    }

    async fn claim(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Claim, CheckoutError> {
        let attempt = self
            .within("order store", self.store.transition(order_id, from, to))
            .await?;
        match attempt {
            Ok(order) => Ok(Claim::Won(order)),
            Err(StoreError::StaleTransition { .. }) => Ok(Claim::Lost(self.order(order_id).await?)),
            Err(e) => Err(e.into()),
        }
    }

    async fn reserve_all(&self, order: &Order) -> Result<(), CheckoutError> {
        let mut acquired: Vec<ReservationToken> = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let attempt = self
                .within(
                    "inventory",
                    self.ledger.reserve(order.id, item.product_id, item.quantity),
                )
                .await;
            let err = match attempt {
                Ok(Ok(token)) => {
                    acquired.push(token);
                    continue;
                }
                Ok(Err(e)) => CheckoutError::from(e),
                Err(e) => {
                    // The reservation may have landed after the deadline.
                    acquired.push(ReservationToken {
                        order_id: order.id,
                        product_id: item.product_id,
                        quantity: item.quantity,
                    });
                    e
                }
            };
            warn!(order_id = %order.id, product_id = %item.product_id, error = %err, "reservation failed, unwinding");
            self.release_all(&acquired, "checkout aborted").await;
            return Err(err);
        }
        Ok(())
    }

    /// Releases in reverse acquisition order. Failures become reconciliation
    /// flags instead of errors.
    async fn release_all(&self, tokens: &[ReservationToken], reason: &str) {
        for token in tokens.iter().rev() {
            match self.within("inventory", self.ledger.release(token)).await {
                Ok(Ok(outcome)) => log_resolution("released", token, outcome),
                Ok(Err(e)) => {
                    self.flag_token(ReconciliationAction::Release, token, format!("{reason}: {e}"))
                        .await
                }
                Err(e) => {
                    self.flag_token(ReconciliationAction::Release, token, format!("{reason}: {e}"))
                        .await
                }
            }
        }
    }

    async fn flag_token(&self, action: ReconciliationAction, token: &ReservationToken, reason: impl ToString) {
        let reason = reason.to_string();
        error!(
            order_id = %token.order_id,
            product_id = %token.product_id,
            %action,
            %reason,
            "ledger action failed, flagging for reconciliation"
        );
        self.flag(NewReconciliationFlag::for_token(action, token, reason)).await;
    }

    async fn flag(&self, flag: NewReconciliationFlag) {
        let order_id = flag.order_id;
        let action = flag.action;
        match self
            .within("order store", self.store.flag_for_reconciliation(flag))
            .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(%order_id, %action, error = %e, "could not record reconciliation flag"),
            Err(e) => error!(%order_id, %action, error = %e, "could not record reconciliation flag"),
        }
    }

    async fn emit(&self, order: &Order, event_type: OrderEventType, reason: Option<String>) {
        let mut event = OrderEvent::new(
            event_type,
            order.id,
            order.user_id,
            order.status.as_str(),
            order.total_amount.clone(),
        );
        if let Some(reason) = reason {
            event = event.with_reason(reason);
        }
        match self.within("event publisher", self.events.publish(&event)).await {
            Ok(Ok(())) => debug!(order_id = %order.id, %event_type, "event published"),
            Ok(Err(e)) => warn!(order_id = %order.id, %event_type, error = %e, "event publish failed"),
            Err(e) => warn!(order_id = %order.id, %event_type, error = %e, "event publish failed"),
        }
    }

    async fn ensure_user(&self, user_id: Uuid) -> Result<(), CheckoutError> {
        let exists = self
            .within("user directory", self.users.exists(user_id))
            .await?
            .map_err(|e| collaborator("user directory", e))?;
        if exists {
            Ok(())
        } else {
            Err(CheckoutError::UserNotFound(user_id))
        }
    }

    async fn price(&self, product_id: Uuid) -> Result<bigdecimal::BigDecimal, CheckoutError> {
        match self
            .within("product catalog", self.catalog.price(product_id))
            .await?
        {
            Ok(price) => Ok(price),
            Err(CollaboratorError::NotFound) => Err(CheckoutError::ProductNotFound(product_id)),
            Err(e) => Err(collaborator("product catalog", e)),
        }
    }

    async fn within<T>(
        &self,
        service: &'static str,
        call: impl Future<Output = T>,
    ) -> Result<T, CheckoutError> {
        tokio::time::timeout(self.config.call_timeout, call)
            .await
            .map_err(|_| {
                CheckoutError::unavailable(
                    service,
                    format!("no answer within {:?}", self.config.call_timeout),
                )
            })
    }
}

/// Validates the request and merges repeated products into one line each,
/// keyed in ascending product order.
fn merge_lines(request: &CheckoutRequest) -> Result<BTreeMap<Uuid, i32>, CheckoutError> {
    if request.items.is_empty() {
        return Err(CheckoutError::Validation("cart is empty".to_string()));
    }
    if request.shipping_address.trim().is_empty() {
        return Err(CheckoutError::Validation("shipping address is required".to_string()));
    }
    if request.payment_method.trim().is_empty() {
        return Err(CheckoutError::Validation("payment method is required".to_string()));
    }

    let mut lines = BTreeMap::new();
    for line in &request.items {
        if line.quantity <= 0 {
            return Err(CheckoutError::Validation(format!(
                "quantity for product {} must be positive, got {}",
                line.product_id, line.quantity
            )));
        }
        let quantity = lines.entry(line.product_id).or_insert(0i32);
        *quantity = quantity.checked_add(line.quantity).ok_or_else(|| {
            CheckoutError::Validation(format!("quantity for product {} overflows", line.product_id))
        })?;
    }
    Ok(lines)
}

fn flatten<T, E: Into<CheckoutError>>(
    result: Result<Result<T, E>, CheckoutError>,
) -> Result<T, CheckoutError> {
    result.and_then(|inner| inner.map_err(Into::into))
}

fn collaborator(service: &'static str, err: CollaboratorError) -> CheckoutError {
    CheckoutError::unavailable(service, err)
}

fn log_resolution(verb: &str, token: &ReservationToken, outcome: ResolveOutcome) {
    match outcome {
        ResolveOutcome::Applied => {
            debug!(order_id = %token.order_id, product_id = %token.product_id, "reservation {verb}")
        }
        ResolveOutcome::AlreadyResolved => {
            warn!(order_id = %token.order_id, product_id = %token.product_id, "reservation was already resolved")
        }
    }
}
