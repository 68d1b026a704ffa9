//! Behavioural properties of the ledger under concurrent use.

use std::sync::Arc;

use inventory_service::{InMemoryInventoryLedger, ReservationStatus};
use shared::{InventoryLedger, LedgerError, ResolveOutcome};
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_over_demand_never_over_reserves() {
    let ledger = Arc::new(InMemoryInventoryLedger::new());
    let product_id = Uuid::new_v4();
    ledger.restock(product_id, 10).await.unwrap();

    // 12 buyers of 3 units each against 10 in stock: exactly 3 can fit.
    let mut handles = Vec::new();
    for _ in 0..12 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.reserve(Uuid::new_v4(), product_id, 3).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LedgerError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, 3);
    let level = ledger.level(product_id).await.unwrap();
    assert_eq!(level.reserved_quantity, 9);
    assert_eq!(level.available_quantity, 1);
    assert_eq!(level.total(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_duplicate_releases_credit_once() {
    let ledger = Arc::new(InMemoryInventoryLedger::new());
    let product_id = Uuid::new_v4();
    ledger.restock(product_id, 5).await.unwrap();
    let token = ledger.reserve(Uuid::new_v4(), product_id, 4).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move { ledger.release(&token).await }));
    }

    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() == ResolveOutcome::Applied {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    let level = ledger.level(product_id).await.unwrap();
    assert_eq!((level.available_quantity, level.reserved_quantity), (5, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn racing_release_and_confirm_resolve_exactly_once() {
    let ledger = Arc::new(InMemoryInventoryLedger::new());
    let product_id = Uuid::new_v4();
    ledger.restock(product_id, 5).await.unwrap();
    let order_id = Uuid::new_v4();
    let token = ledger.reserve(order_id, product_id, 3).await.unwrap();

    let releasing = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.release(&token).await })
    };
    let confirming = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.confirm_deduct(&token).await })
    };
    let released = releasing.await.unwrap().unwrap();
    let confirmed = confirming.await.unwrap().unwrap();

    let level = ledger.level(product_id).await.unwrap();
    assert_eq!(level.reserved_quantity, 0);
    match (released, confirmed) {
        (ResolveOutcome::Applied, ResolveOutcome::AlreadyResolved) => {
            assert_eq!(level.available_quantity, 5);
            assert_eq!(
                ledger.reservation_status(order_id, product_id).await,
                Some(ReservationStatus::Released)
            );
        }
        (ResolveOutcome::AlreadyResolved, ResolveOutcome::Applied) => {
            assert_eq!(level.available_quantity, 2);
            assert_eq!(
                ledger.reservation_status(order_id, product_id).await,
                Some(ReservationStatus::Confirmed)
            );
        }
        other => panic!("reservation resolved twice or never: {other:?}"),
    }
}

/// available + reserved == stock received - stock confirmed, after any mix of
/// operations.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stock_is_conserved_across_mixed_workload() {
    let ledger = Arc::new(InMemoryInventoryLedger::new());
    let product_id = Uuid::new_v4();
    ledger.restock(product_id, 50).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..40 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            let quantity = (i % 4) + 1;
            let token = match ledger.reserve(Uuid::new_v4(), product_id, quantity).await {
                Ok(token) => token,
                Err(_) => return 0,
            };
            if i % 3 == 0 {
                ledger.release(&token).await.unwrap();
                0
            } else {
                ledger.confirm_deduct(&token).await.unwrap();
                quantity
            }
        }));
    }

    let mut confirmed = 0;
    for handle in handles {
        confirmed += handle.await.unwrap();
    }
    ledger.restock(product_id, 5).await.unwrap();

    let level = ledger.level(product_id).await.unwrap();
    assert!(level.available_quantity >= 0);
    assert_eq!(level.reserved_quantity, 0);
    assert_eq!(level.total(), 50 + 5 - confirmed);
}

#[tokio::test]
async fn disjoint_products_do_not_interfere() {
    let ledger = InMemoryInventoryLedger::new();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    ledger.restock(a, 1).await.unwrap();
    ledger.restock(b, 1).await.unwrap();

    ledger.reserve(Uuid::new_v4(), a, 1).await.unwrap();
    assert!(ledger.reserve(Uuid::new_v4(), a, 1).await.is_err());
    ledger.reserve(Uuid::new_v4(), b, 1).await.unwrap();

    assert_eq!(ledger.level(b).await.unwrap().reserved_quantity, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn release_racing_a_late_reserve_never_strands_stock() {
    for _ in 0..50 {
        let ledger = Arc::new(InMemoryInventoryLedger::new());
        let product_id = Uuid::new_v4();
        ledger.restock(product_id, 5).await.unwrap();
        let token = shared::ReservationToken {
            order_id: Uuid::new_v4(),
            product_id,
            quantity: 3,
        };

        let reserver = ledger.clone();
        let reserve = tokio::spawn(async move {
            reserver.reserve(token.order_id, token.product_id, token.quantity).await
        });
        let releaser = ledger.clone();
        let release = tokio::spawn(async move { releaser.release(&token).await });

        let reserved = reserve.await.unwrap();
        let released = release.await.unwrap().unwrap();
        match reserved {
            Ok(_) => assert_eq!(released, ResolveOutcome::Applied),
            Err(LedgerError::ReservationResolved { .. }) => {
                assert_eq!(released, ResolveOutcome::AlreadyResolved)
            }
            Err(other) => panic!("unexpected error: {other}"),
        }

        let level = ledger.level(product_id).await.unwrap();
        assert_eq!((level.available_quantity, level.reserved_quantity), (5, 0));
        assert_eq!(
            ledger.reservation_status(token.order_id, product_id).await,
            Some(ReservationStatus::Released)
        );
    }
}
