//! In-memory inventory ledger.
//!
//! Holds the whole ledger behind one async mutex, so every operation is
//! trivially atomic. Used by tests across the workspace and for running the
//! service without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    validate_quantity, InventoryLedger, InventoryLevel, LedgerError, ReservationToken,
    ResolveOutcome,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::ReservationStatus;

#[derive(Debug, Default)]
struct LedgerState {
    stock: HashMap<Uuid, InventoryLevel>,
    reservations: HashMap<(Uuid, Uuid), (i32, ReservationStatus)>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryLedger {
    state: Arc<Mutex<LedgerState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryInventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `LedgerError::Unavailable` until
    /// switched back off.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn reservation_status(
        &self,
        order_id: Uuid,
        product_id: Uuid,
    ) -> Option<ReservationStatus> {
        self.state
            .lock()
            .await
            .reservations
            .get(&(order_id, product_id))
            .map(|(_, status)| *status)
    }

    pub async fn open_reservation_count(&self) -> usize {
        self.state
            .lock()
            .await
            .reservations
            .values()
            .filter(|(_, status)| *status == ReservationStatus::Reserved)
            .count()
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::unavailable("in-memory ledger switched off"));
        }
        Ok(())
    }

    async fn close(
        &self,
        token: &ReservationToken,
        target: ReservationStatus,
    ) -> Result<ResolveOutcome, LedgerError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let key = (token.order_id, token.product_id);
        if !state.reservations.contains_key(&key) {
            if target == ReservationStatus::Released
                && token.quantity > 0
                && state.stock.contains_key(&token.product_id)
            {
                state
                    .reservations
                    .insert(key, (token.quantity, ReservationStatus::Released));
            }
            return Ok(ResolveOutcome::AlreadyResolved);
        }
        let Some((quantity, status)) = state.reservations.get_mut(&key) else {
            return Ok(ResolveOutcome::AlreadyResolved);
        };
        if *status != ReservationStatus::Reserved {
            return Ok(ResolveOutcome::AlreadyResolved);
        }
        let level = state
            .stock
            .get_mut(&token.product_id)
            .ok_or(LedgerError::ProductNotFound {
                product_id: token.product_id,
            })?;

        *status = target;
        level.reserved_quantity -= *quantity;
        if target == ReservationStatus::Released {
            level.available_quantity += *quantity;
        }
        Ok(ResolveOutcome::Applied)
    }
}

#[async_trait]
impl InventoryLedger for InMemoryInventoryLedger {
    async fn reserve(
        &self,
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<ReservationToken, LedgerError> {
        validate_quantity(quantity)?;
        self.check_available()?;
        let mut state = self.state.lock().await;

        if let Some((held, status)) = state.reservations.get(&(order_id, product_id)) {
            if *status != ReservationStatus::Reserved {
                return Err(LedgerError::ReservationResolved {
                    order_id,
                    product_id,
                    status: status.to_string(),
                });
            }
            return Ok(ReservationToken {
                order_id,
                product_id,
                quantity: *held,
            });
        }

        let level = state
            .stock
            .get_mut(&product_id)
            .ok_or(LedgerError::ProductNotFound { product_id })?;
        if level.available_quantity < quantity {
            return Err(LedgerError::InsufficientStock {
                product_id,
                requested: quantity,
                available: level.available_quantity,
            });
        }
        level.available_quantity -= quantity;
        level.reserved_quantity += quantity;

        state.reservations.insert(
            (order_id, product_id),
            (quantity, ReservationStatus::Reserved),
        );
        Ok(ReservationToken {
            order_id,
            product_id,
            quantity,
        })
    }

    async fn release(&self, token: &ReservationToken) -> Result<ResolveOutcome, LedgerError> {
        self.close(token, ReservationStatus::Released).await
    }

    async fn confirm_deduct(
        &self,
        token: &ReservationToken,
    ) -> Result<ResolveOutcome, LedgerError> {
        self.close(token, ReservationStatus::Confirmed).await
    }

    async fn restock(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<InventoryLevel, LedgerError> {
        validate_quantity(quantity)?;
        self.check_available()?;
        let mut state = self.state.lock().await;
        let level = state.stock.entry(product_id).or_insert(InventoryLevel {
            product_id,
            available_quantity: 0,
            reserved_quantity: 0,
        });
        level
            .available_quantity
            .checked_add(level.reserved_quantity)
            .and_then(|total| total.checked_add(quantity))
            .ok_or(LedgerError::CapacityExceeded {
                product_id,
                quantity,
            })?;
        level.available_quantity += quantity;
        Ok(*level)
    }

    async fn level(&self, product_id: Uuid) -> Result<InventoryLevel, LedgerError> {
        self.check_available()?;
        self.state
            .lock()
            .await
            .stock
            .get(&product_id)
            .copied()
            .ok_or(LedgerError::ProductNotFound { product_id })
    }
}
