//! Inventory ledger contract.
//!
//! Stock for a product is split into `available` and `reserved`. A checkout
//! moves quantity from available to reserved (`reserve`); the hold is later
//! either returned (`release`) or consumed (`confirm_deduct`). The sum of the
//! two counters only changes through `restock` and `confirm_deduct`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifies one hold of stock against one product on behalf of one order.
///
/// A reservation is keyed by `(order_id, product_id)`, which is what makes
/// release and confirm idempotent: the ledger resolves each key at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationToken {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Snapshot of a product's stock counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLevel {
    pub product_id: Uuid,
    pub available_quantity: i32,
    pub reserved_quantity: i32,
}

impl InventoryLevel {
    pub fn total(&self) -> i32 {
        self.available_quantity + self.reserved_quantity
    }
}

/// Whether a release or confirm changed ledger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOutcome {
    /// The reservation was open and has now been resolved.
    Applied,
    /// The reservation was already released or confirmed, or never existed.
    AlreadyResolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestockRequest {
    pub quantity: i32,
}

/// Errors returned by ledger operations.
///
/// Serializable so the HTTP surface can hand the exact variant back to
/// remote callers.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerError {
    #[error("quantity must be positive, got {quantity}")]
    InvalidQuantity { quantity: i32 },

    #[error("no inventory record for product {product_id}")]
    ProductNotFound { product_id: Uuid },

    #[error(
        "insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    /// The `(order, product)` pair already has a reservation that was released
    /// or confirmed; a resolved reservation is never reopened.
    #[error("reservation for order {order_id} on product {product_id} is already {status}")]
    ReservationResolved {
        order_id: Uuid,
        product_id: Uuid,
        status: String,
    },

    #[error("restocking product {product_id} by {quantity} exceeds the ledger's capacity")]
    CapacityExceeded { product_id: Uuid, quantity: i32 },

    #[error("inventory ledger unavailable: {reason}")]
    Unavailable { reason: String },
}

impl LedgerError {
    pub fn unavailable(reason: impl ToString) -> Self {
        LedgerError::Unavailable {
            reason: reason.to_string(),
        }
    }

    /// How many units the caller was short by, for `InsufficientStock`.
    pub fn shortfall(&self) -> Option<i32> {
        match self {
            LedgerError::InsufficientStock {
                requested,
                available,
                ..
            } => Some(requested - available),
            _ => None,
        }
    }
}

pub fn validate_quantity(quantity: i32) -> Result<(), LedgerError> {
    if quantity <= 0 {
        return Err(LedgerError::InvalidQuantity { quantity });
    }
    Ok(())
}

/// Stock ledger with atomic reserve / release / confirm-deduct.
///
/// Implementations must be safe under concurrent calls for the same product:
/// `reserve` may never drive `available_quantity` below zero, and a given
/// reservation leaves the `reserved` state exactly once.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Moves `quantity` from available to reserved, or fails without mutating.
    async fn reserve(
        &self,
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<ReservationToken, LedgerError>;

    /// Returns a held quantity to available stock. Releasing a key that was
    /// never reserved records it as released, so a reserve for the same key
    /// arriving afterwards is refused instead of holding stock.
    async fn release(&self, token: &ReservationToken) -> Result<ResolveOutcome, LedgerError>;

    /// Turns a held quantity into a permanent deduction. Available stock is
    /// untouched; it already went down at reserve time.
    async fn confirm_deduct(&self, token: &ReservationToken)
        -> Result<ResolveOutcome, LedgerError>;

    /// Adds stock, creating the record on the first delivery.
    async fn restock(&self, product_id: Uuid, quantity: i32)
        -> Result<InventoryLevel, LedgerError>;

    async fn level(&self, product_id: Uuid) -> Result<InventoryLevel, LedgerError>;
}
