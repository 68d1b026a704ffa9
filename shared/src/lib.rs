//! Contracts shared between the order, inventory and payment services.
//!
//! Each service owns its own datastore. What crosses a service boundary is
//! defined here: the inventory ledger operations, the domain events the
//! order service emits, the payment results the payment service reports,
//! and the messaging configuration both sides agree on.

pub mod events;
pub mod inventory;
pub mod messaging;

pub use events::{OrderEvent, OrderEventType, PaymentResult, PaymentStatus};
pub use inventory::{
    InventoryLedger, InventoryLevel, LedgerError, ReservationRequest, ReservationToken,
    ResolveOutcome, RestockRequest, validate_quantity,
};
pub use messaging::MessagingConfig;
