//! End-to-end checkout saga against in-memory collaborators.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use inventory_service::{InMemoryInventoryLedger, ReservationStatus};
use order_service::collaborators::{
    InMemoryCatalog, InMemoryPaymentGateway, InMemoryUserDirectory, RecordingEventPublisher,
};
use order_service::payments::PaymentResultConsumer;
use order_service::{
    CheckoutConfig, CheckoutError, CheckoutLine, CheckoutOrchestrator, CheckoutRequest,
    InMemoryOrderStore, NewReconciliationFlag, Order, OrderStatus, OrderStore,
    ReconcileReport, ReconciliationAction, ReconciliationFlag, Resolution, StoreError,
};
use shared::{
    InventoryLedger, InventoryLevel, LedgerError, OrderEventType, PaymentResult,
    ReservationToken, ResolveOutcome,
};
use uuid::Uuid;

/// Wraps the in-memory ledger with switchable latency and release failures.
#[derive(Clone, Default)]
struct FlakyLedger {
    inner: InMemoryInventoryLedger,
    reserve_delay: Arc<std::sync::Mutex<Option<Duration>>>,
    fail_releases: Arc<AtomicBool>,
}

impl FlakyLedger {
    fn slow_reserves(&self, delay: Duration) {
        *self.reserve_delay.lock().unwrap() = Some(delay);
    }

    fn fail_releases(&self, fail: bool) {
        self.fail_releases.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl InventoryLedger for FlakyLedger {
    async fn reserve(
        &self,
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<ReservationToken, LedgerError> {
        let delay = *self.reserve_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.reserve(order_id, product_id, quantity).await
    }

    async fn release(&self, token: &ReservationToken) -> Result<ResolveOutcome, LedgerError> {
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(LedgerError::unavailable("connection reset"));
        }
        self.inner.release(token).await
    }

    async fn confirm_deduct(&self, token: &ReservationToken) -> Result<ResolveOutcome, LedgerError> {
        self.inner.confirm_deduct(token).await
    }

    async fn restock(&self, product_id: Uuid, quantity: i32) -> Result<InventoryLevel, LedgerError> {
        self.inner.restock(product_id, quantity).await
    }

    async fn level(&self, product_id: Uuid) -> Result<InventoryLevel, LedgerError> {
        self.inner.level(product_id).await
    }
}

/// Wraps the in-memory store so the next N status transitions fail as if the
/// database were unreachable.
#[derive(Clone, Default)]
struct FlakyStore {
    inner: InMemoryOrderStore,
    failing_transitions: Arc<AtomicUsize>,
}

#[async_trait]
impl OrderStore for FlakyStore {
    async fn create(&self, order: &Order) -> Result<Uuid, StoreError> {
        self.inner.create(order).await
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        self.inner.get(order_id).await
    }

    async fn transition(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Order, StoreError> {
        let outage = self
            .failing_transitions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if outage {
            return Err(StoreError::database("connection refused"));
        }
        self.inner.transition(order_id, from, to).await
    }

    async fn pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError> {
        self.inner.pending_older_than(cutoff, limit).await
    }

    async fn flag_for_reconciliation(&self, flag: NewReconciliationFlag) -> Result<Uuid, StoreError> {
        self.inner.flag_for_reconciliation(flag).await
    }

    async fn open_reconciliation_flags(
        &self,
        actions: &[ReconciliationAction],
        limit: i64,
    ) -> Result<Vec<ReconciliationFlag>, StoreError> {
        self.inner.open_reconciliation_flags(actions, limit).await
    }

    async fn resolve_reconciliation_flag(&self, flag_id: Uuid) -> Result<(), StoreError> {
        self.inner.resolve_reconciliation_flag(flag_id).await
    }
}

struct Harness {
    orchestrator: Arc<CheckoutOrchestrator>,
    store: InMemoryOrderStore,
    store_faults: FlakyStore,
    ledger: FlakyLedger,
    catalog: InMemoryCatalog,
    gateway: InMemoryPaymentGateway,
    events: RecordingEventPublisher,
    user_id: Uuid,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(CheckoutConfig {
            call_timeout: Duration::from_millis(200),
            ..CheckoutConfig::default()
        })
    }

    fn with_config(config: CheckoutConfig) -> Self {
        let store_faults = FlakyStore::default();
        let store = store_faults.inner.clone();
        let ledger = FlakyLedger::default();
        let catalog = InMemoryCatalog::new();
        let gateway = InMemoryPaymentGateway::new();
        let events = RecordingEventPublisher::new();
        let user_id = Uuid::new_v4();
        let orchestrator = CheckoutOrchestrator::new(
            Arc::new(store_faults.clone()),
            Arc::new(ledger.clone()),
            Arc::new(catalog.clone()),
            Arc::new(InMemoryUserDirectory::new().with_user(user_id)),
            Arc::new(gateway.clone()),
            Arc::new(events.clone()),
            config,
        );
        Self {
            orchestrator: Arc::new(orchestrator),
            store,
            store_faults,
            ledger,
            catalog,
            gateway,
            events,
            user_id,
        }
    }

    async fn product(&self, stock: i32, price: i64) -> Uuid {
        let product_id = Uuid::new_v4();
        self.catalog.set_price(product_id, BigDecimal::from(price));
        self.ledger.restock(product_id, stock).await.unwrap();
        product_id
    }

    fn request(&self, items: &[(Uuid, i32)]) -> CheckoutRequest {
        CheckoutRequest {
            user_id: self.user_id,
            items: items
                .iter()
                .map(|&(product_id, quantity)| CheckoutLine {
                    product_id,
                    quantity,
                })
                .collect(),
            shipping_address: "1 Main St".to_string(),
            payment_method: "card".to_string(),
        }
    }

    fn fail_next_transitions(&self, count: usize) {
        self.store_faults
            .failing_transitions
            .store(count, Ordering::SeqCst);
    }

    async fn level(&self, product_id: Uuid) -> (i32, i32) {
        let level = self.ledger.level(product_id).await.unwrap();
        (level.available_quantity, level.reserved_quantity)
    }

    async fn event_types(&self) -> Vec<OrderEventType> {
        self.events
            .events()
            .await
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }
}

#[tokio::test]
async fn paid_order_deducts_stock() {
    let h = Harness::new();
    let product = h.product(5, 10).await;

    let receipt = h.orchestrator.checkout(h.request(&[(product, 3)])).await.unwrap();
    assert_eq!(receipt.order.status, OrderStatus::Pending);
    assert_eq!(receipt.order.total_amount, BigDecimal::from(30));
    assert_eq!(h.level(product).await, (2, 3));

    let initiated = h.gateway.initiated().await;
    assert_eq!(initiated.len(), 1);
    assert_eq!(initiated[0].amount, BigDecimal::from(30));
    let transaction_ref = receipt.transaction_ref.unwrap();
    assert_eq!(initiated[0].transaction_ref, transaction_ref);

    let resolution = h
        .orchestrator
        .on_payment_result(PaymentResult::succeeded(receipt.order.id, transaction_ref))
        .await
        .unwrap();
    assert!(resolution.is_applied());
    assert_eq!(resolution.order().status, OrderStatus::Processing);
    assert_eq!(h.level(product).await, (2, 0));
    assert_eq!(
        h.ledger.inner.reservation_status(receipt.order.id, product).await,
        Some(ReservationStatus::Confirmed)
    );
    assert_eq!(
        h.event_types().await,
        vec![OrderEventType::OrderCreated, OrderEventType::OrderProcessing]
    );
}

#[tokio::test]
async fn insufficient_stock_leaves_inventory_untouched() {
    let h = Harness::new();
    let product = h.product(5, 10).await;

    let err = h
        .orchestrator
        .checkout(h.request(&[(product, 10)]))
        .await
        .unwrap_err();
    match &err {
        CheckoutError::InsufficientStock {
            product_id,
            requested,
            available,
        } => {
            assert_eq!(*product_id, product);
            assert_eq!(*requested, 10);
            assert_eq!(*available, 5);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.shortfall(), Some(5));
    assert_eq!(h.level(product).await, (5, 0));
    assert_eq!(h.store.order_count().await, 0);
    assert!(h.gateway.initiated().await.is_empty());
}

#[tokio::test]
async fn failed_payment_cancels_and_releases() {
    let h = Harness::new();
    let product = h.product(5, 10).await;
    let receipt = h.orchestrator.checkout(h.request(&[(product, 3)])).await.unwrap();

    let resolution = h
        .orchestrator
        .on_payment_result(PaymentResult::failed(
            receipt.order.id,
            receipt.transaction_ref.unwrap(),
            "card declined",
        ))
        .await
        .unwrap();

    assert!(resolution.is_applied());
    assert_eq!(resolution.order().status, OrderStatus::Cancelled);
    assert_eq!(h.level(product).await, (5, 0));
    let cancelled = h.events.events().await.pop().unwrap();
    assert_eq!(cancelled.event_type, OrderEventType::OrderCancelled);
    assert_eq!(cancelled.reason.as_deref(), Some("payment failed: card declined"));
}

#[tokio::test]
async fn duplicate_payment_success_is_a_no_op() {
    let h = Harness::new();
    let product = h.product(5, 10).await;
    let receipt = h.orchestrator.checkout(h.request(&[(product, 3)])).await.unwrap();
    let result = PaymentResult::succeeded(receipt.order.id, receipt.transaction_ref.unwrap());

    let first = h.orchestrator.on_payment_result(result.clone()).await.unwrap();
    let second = h.orchestrator.on_payment_result(result).await.unwrap();

    assert!(first.is_applied());
    assert!(matches!(second, Resolution::AlreadyResolved(ref o) if o.status == OrderStatus::Processing));
    assert_eq!(h.level(product).await, (2, 0));
    assert_eq!(
        h.event_types().await,
        vec![OrderEventType::OrderCreated, OrderEventType::OrderProcessing]
    );
    assert!(h.store.open_reconciliation_flags(&ReconciliationAction::ALL, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn mixed_cart_rolls_back_every_reservation() {
    let h = Harness::new();
    let plenty = h.product(10, 1).await;
    let scarce = h.product(1, 1).await;
    let also_plenty = h.product(10, 1).await;

    let err = h
        .orchestrator
        .checkout(h.request(&[(plenty, 2), (scarce, 2), (also_plenty, 2)]))
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::InsufficientStock { product_id, .. } if product_id == scarce));
    assert_eq!(h.level(plenty).await, (10, 0));
    assert_eq!(h.level(scarce).await, (1, 0));
    assert_eq!(h.level(also_plenty).await, (10, 0));
    assert_eq!(h.ledger.inner.open_reservation_count().await, 0);
    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test]
async fn duplicate_lines_reserve_once() {
    let h = Harness::new();
    let product = h.product(5, 2).await;

    let receipt = h
        .orchestrator
        .checkout(h.request(&[(product, 1), (product, 2)]))
        .await
        .unwrap();

    assert_eq!(receipt.order.items.len(), 1);
    assert_eq!(receipt.order.items[0].quantity, 3);
    assert_eq!(receipt.order.total_amount, BigDecimal::from(6));
    assert_eq!(h.level(product).await, (2, 3));
}

#[tokio::test]
async fn expiry_then_late_success_flags_a_refund() {
    let h = Harness::new();
    let product = h.product(5, 10).await;
    let receipt = h.orchestrator.checkout(h.request(&[(product, 3)])).await.unwrap();
    h.store
        .backdate(receipt.order.id, Utc::now() - chrono::Duration::minutes(20))
        .await;

    let report = h.orchestrator.expire_stale(Utc::now()).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.expired, 1);
    assert_eq!(h.level(product).await, (5, 0));

    // Sweeping again finds nothing.
    assert_eq!(h.orchestrator.expire_stale(Utc::now()).await.unwrap().examined, 0);

    let late = h
        .orchestrator
        .on_payment_result(PaymentResult::succeeded(
            receipt.order.id,
            receipt.transaction_ref.unwrap(),
        ))
        .await
        .unwrap();
    assert!(matches!(late, Resolution::AlreadyResolved(ref o) if o.status == OrderStatus::Cancelled));
    assert_eq!(h.level(product).await, (5, 0));

    let flags = h.store.open_reconciliation_flags(&ReconciliationAction::ALL, 10).await.unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].action, ReconciliationAction::Refund);
    assert_eq!(flags[0].order_id, receipt.order.id);

    // Refunds stay open for an operator.
    let reconciled = h.orchestrator.reconcile().await.unwrap();
    assert_eq!(reconciled, ReconcileReport::default());
    assert_eq!(
        h.store
            .open_reconciliation_flags(&ReconciliationAction::ALL, 10)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn fresh_orders_survive_the_sweep() {
    let h = Harness::new();
    let product = h.product(5, 10).await;
    h.orchestrator.checkout(h.request(&[(product, 3)])).await.unwrap();

    let report = h.orchestrator.expire_stale(Utc::now()).await.unwrap();
    assert_eq!(report.expired, 0);
    assert_eq!(h.level(product).await, (2, 3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweep_racing_payment_has_exactly_one_winner() {
    for _ in 0..20 {
        let h = Harness::new();
        let product = h.product(5, 10).await;
        let receipt = h.orchestrator.checkout(h.request(&[(product, 3)])).await.unwrap();
        h.store
            .backdate(receipt.order.id, Utc::now() - chrono::Duration::minutes(20))
            .await;

        let sweeper = h.orchestrator.clone();
        let sweep = tokio::spawn(async move { sweeper.expire_stale(Utc::now()).await });
        let payer = h.orchestrator.clone();
        let result = PaymentResult::succeeded(receipt.order.id, receipt.transaction_ref.unwrap());
        let pay = tokio::spawn(async move { payer.on_payment_result(result).await });

        let swept = sweep.await.unwrap().unwrap();
        let paid = pay.await.unwrap().unwrap();

        let order = h.orchestrator.order(receipt.order.id).await.unwrap();
        match order.status {
            OrderStatus::Processing => {
                assert!(paid.is_applied());
                assert_eq!(swept.expired, 0);
                assert_eq!(h.level(product).await, (2, 0));
            }
            OrderStatus::Cancelled => {
                assert!(!paid.is_applied());
                assert_eq!(swept.expired, 1);
                assert_eq!(h.level(product).await, (5, 0));
            }
            other => panic!("unexpected status {other}"),
        }
    }
}

#[tokio::test]
async fn store_failure_releases_reservations() {
    let h = Harness::new();
    let product = h.product(5, 10).await;
    h.store.set_fail_creates(true);

    let err = h
        .orchestrator
        .checkout(h.request(&[(product, 3)]))
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::ServiceUnavailable { service: "order store", .. }));
    assert_eq!(h.level(product).await, (5, 0));
    assert!(h.gateway.initiated().await.is_empty());
    assert!(h.events.events().await.is_empty());
}

#[tokio::test]
async fn payment_initiation_failure_cancels_the_order() {
    let h = Harness::new();
    let product = h.product(5, 10).await;
    h.gateway.set_failing(true);

    let receipt = h.orchestrator.checkout(h.request(&[(product, 3)])).await.unwrap();

    assert_eq!(receipt.order.status, OrderStatus::Cancelled);
    assert!(receipt.transaction_ref.is_none());
    assert_eq!(h.level(product).await, (5, 0));
    assert_eq!(
        h.event_types().await,
        vec![OrderEventType::OrderCreated, OrderEventType::OrderCancelled]
    );
}

#[tokio::test]
async fn slow_payment_gateway_times_out_into_cancellation() {
    let h = Harness::new();
    let product = h.product(5, 10).await;
    h.gateway.set_delay(Some(Duration::from_secs(2)));

    let receipt = h.orchestrator.checkout(h.request(&[(product, 3)])).await.unwrap();

    assert_eq!(receipt.order.status, OrderStatus::Cancelled);
    assert_eq!(h.level(product).await, (5, 0));
}

#[tokio::test]
async fn unknown_user_or_product_is_rejected_before_reserving() {
    let h = Harness::new();
    let product = h.product(5, 10).await;

    let mut request = h.request(&[(product, 1)]);
    request.user_id = Uuid::new_v4();
    let err = h.orchestrator.checkout(request).await.unwrap_err();
    assert!(matches!(err, CheckoutError::UserNotFound(_)));

    let missing = Uuid::new_v4();
    let err = h
        .orchestrator
        .checkout(h.request(&[(product, 1), (missing, 1)]))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::ProductNotFound(id) if id == missing));

    assert_eq!(h.level(product).await, (5, 0));
    assert_eq!(h.ledger.inner.open_reservation_count().await, 0);
}

#[tokio::test]
async fn slow_ledger_surfaces_service_unavailable() {
    let h = Harness::new();
    let product = h.product(5, 10).await;
    h.ledger.slow_reserves(Duration::from_secs(2));

    let err = h
        .orchestrator
        .checkout(h.request(&[(product, 3)]))
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::ServiceUnavailable { service: "inventory", .. }));
    assert_eq!(h.level(product).await, (5, 0));
    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test]
async fn failed_release_is_flagged_and_reconciled_later() {
    let h = Harness::new();
    let product = h.product(5, 10).await;
    let receipt = h.orchestrator.checkout(h.request(&[(product, 3)])).await.unwrap();

    h.ledger.fail_releases(true);
    let cancelled = h.orchestrator.cancel(receipt.order.id).await.unwrap();
    assert_eq!(cancelled.order().status, OrderStatus::Cancelled);
    assert_eq!(h.level(product).await, (2, 3));

    let flags = h.store.open_reconciliation_flags(&ReconciliationAction::ALL, 10).await.unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].action, ReconciliationAction::Release);
    assert_eq!(flags[0].product_id, product);
    assert_eq!(flags[0].quantity, 3);

    // Still down: the flag stays open.
    let report = h.orchestrator.reconcile().await.unwrap();
    assert_eq!(report.still_open, 1);

    h.ledger.fail_releases(false);
    let report = h.orchestrator.reconcile().await.unwrap();
    assert_eq!(report.resolved, 1);
    assert_eq!(h.level(product).await, (5, 0));
    assert!(h.store.open_reconciliation_flags(&ReconciliationAction::ALL, 10).await.unwrap().is_empty());

    // Replaying the release is harmless.
    assert_eq!(h.orchestrator.reconcile().await.unwrap().resolved, 0);
    assert_eq!(h.level(product).await, (5, 0));
}

#[tokio::test]
async fn user_cancel_only_from_pending() {
    let h = Harness::new();
    let product = h.product(5, 10).await;
    let receipt = h.orchestrator.checkout(h.request(&[(product, 3)])).await.unwrap();
    h.orchestrator
        .on_payment_result(PaymentResult::succeeded(
            receipt.order.id,
            receipt.transaction_ref.unwrap(),
        ))
        .await
        .unwrap();

    let err = h.orchestrator.cancel(receipt.order.id).await.unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::InvalidTransition {
            actual: OrderStatus::Processing,
            to: OrderStatus::Cancelled,
            ..
        }
    ));
    assert_eq!(h.level(product).await, (2, 0));
}

#[tokio::test]
async fn fulfilment_walks_the_state_machine() {
    let h = Harness::new();
    let product = h.product(5, 10).await;
    let receipt = h.orchestrator.checkout(h.request(&[(product, 1)])).await.unwrap();
    let order_id = receipt.order.id;

    // Cannot ship before payment.
    assert!(matches!(
        h.orchestrator.ship(order_id).await,
        Err(CheckoutError::InvalidTransition { .. })
    ));

    h.orchestrator
        .on_payment_result(PaymentResult::succeeded(order_id, receipt.transaction_ref.unwrap()))
        .await
        .unwrap();
    assert_eq!(h.orchestrator.ship(order_id).await.unwrap().status, OrderStatus::Shipped);
    assert_eq!(h.orchestrator.deliver(order_id).await.unwrap().status, OrderStatus::Delivered);
    assert!(h.orchestrator.mark_returned(order_id).await.is_err());

    assert_eq!(
        h.event_types().await,
        vec![
            OrderEventType::OrderCreated,
            OrderEventType::OrderProcessing,
            OrderEventType::OrderShipped,
            OrderEventType::OrderDelivered,
        ]
    );
}

#[tokio::test]
async fn unknown_order_payment_result_is_not_found() {
    let h = Harness::new();
    let err = h
        .orchestrator
        .on_payment_result(PaymentResult::succeeded(Uuid::new_v4(), "txn_unknown"))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::OrderNotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_checkouts_never_oversell() {
    let h = Harness::new();
    let product = h.product(10, 1).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let orchestrator = h.orchestrator.clone();
        let request = h.request(&[(product, 3)]);
        handles.push(tokio::spawn(async move { orchestrator.checkout(request).await }));
    }

    let mut placed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => placed += 1,
            Err(CheckoutError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(placed, 3);
    assert_eq!(h.level(product).await, (1, 9));
    assert_eq!(h.store.order_count().await, 3);
}

#[tokio::test]
async fn consumer_applies_broker_payloads() {
    let h = Harness::new();
    let product = h.product(5, 10).await;
    let receipt = h.orchestrator.checkout(h.request(&[(product, 3)])).await.unwrap();
    let consumer = PaymentResultConsumer::new(h.orchestrator.clone())
        .with_retry_backoff(Duration::from_millis(1), Duration::from_millis(5));

    let payload = serde_json::to_string(&PaymentResult::succeeded(
        receipt.order.id,
        receipt.transaction_ref.unwrap(),
    ))
    .unwrap();
    assert!(consumer.handle_payload(&payload).await.unwrap().is_applied());
    assert!(!consumer.handle_payload(&payload).await.unwrap().is_applied());
    assert_eq!(h.level(product).await, (2, 0));

    assert!(consumer.handle_payload("{not json").await.is_err());
}

#[tokio::test]
async fn consumer_holds_a_success_through_a_store_outage() {
    let h = Harness::new();
    let product = h.product(5, 10).await;
    let receipt = h.orchestrator.checkout(h.request(&[(product, 3)])).await.unwrap();
    let consumer = PaymentResultConsumer::new(h.orchestrator.clone())
        .with_retry_backoff(Duration::from_millis(1), Duration::from_millis(5));

    // Longer than any fixed retry budget would tolerate.
    h.fail_next_transitions(12);
    let payload = serde_json::to_string(&PaymentResult::succeeded(
        receipt.order.id,
        receipt.transaction_ref.unwrap(),
    ))
    .unwrap();
    let resolution = consumer.handle_payload(&payload).await.unwrap();
    assert!(resolution.is_applied());
    assert_eq!(resolution.order().status, OrderStatus::Processing);

    // The hold elapsing afterwards must not undo the payment.
    h.store
        .backdate(receipt.order.id, Utc::now() - chrono::Duration::minutes(20))
        .await;
    assert_eq!(h.orchestrator.expire_stale(Utc::now()).await.unwrap().expired, 0);
    assert_eq!(
        h.orchestrator.order(receipt.order.id).await.unwrap().status,
        OrderStatus::Processing
    );
    assert_eq!(h.level(product).await, (2, 0));
}

#[tokio::test]
async fn refund_flags_do_not_starve_release_retries() {
    let h = Harness::with_config(CheckoutConfig {
        call_timeout: Duration::from_millis(200),
        sweep_batch: 1,
        ..CheckoutConfig::default()
    });
    let product = h.product(5, 10).await;
    h.store
        .flag_for_reconciliation(NewReconciliationFlag::refund(
            Uuid::new_v4(),
            "payment settled after cancellation",
        ))
        .await
        .unwrap();

    let receipt = h.orchestrator.checkout(h.request(&[(product, 3)])).await.unwrap();
    h.ledger.fail_releases(true);
    h.orchestrator.cancel(receipt.order.id).await.unwrap();
    h.ledger.fail_releases(false);
    assert_eq!(h.level(product).await, (2, 3));

    let report = h.orchestrator.reconcile().await.unwrap();
    assert_eq!(report.resolved, 1);
    assert_eq!(h.level(product).await, (5, 0));

    let open = h
        .store
        .open_reconciliation_flags(&ReconciliationAction::ALL, 10)
        .await
        .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].action, ReconciliationAction::Refund);
}

#[tokio::test]
async fn sub_cent_prices_are_snapshotted_exactly() {
    let h = Harness::new();
    let product = Uuid::new_v4();
    h.catalog.set_price(product, BigDecimal::from_str("0.125").unwrap());
    h.ledger.restock(product, 10).await.unwrap();

    let receipt = h.orchestrator.checkout(h.request(&[(product, 3)])).await.unwrap();

    let expected = BigDecimal::from_str("0.375").unwrap();
    assert_eq!(receipt.order.total_amount, expected);
    assert_eq!(
        receipt.order.items[0].price_at_time_of_order,
        BigDecimal::from_str("0.125").unwrap()
    );
    assert_eq!(h.gateway.initiated().await[0].amount, expected);
    let stored = h.orchestrator.order(receipt.order.id).await.unwrap();
    assert_eq!(stored.total_amount, expected);
}
