//! Inventory ledger service.
//!
//! Owns the `inventory` and `reservations` tables and exposes the
//! reserve / release / confirm-deduct protocol over HTTP.

pub mod api;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod schema;

pub use ledger::{DbPool, PgInventoryLedger};
pub use memory::InMemoryInventoryLedger;
pub use models::ReservationStatus;
