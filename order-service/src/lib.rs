pub mod api;
pub mod checkout;
pub mod clients;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod models;
pub mod order;
pub mod outbox;
pub mod payments;
pub mod postgres;
pub mod schema;
pub mod store;
pub mod sweeper;

pub use checkout::{
    CancellationReason, CheckoutConfig, CheckoutLine, CheckoutOrchestrator, CheckoutReceipt,
    CheckoutRequest, ReconcileReport, Resolution, SweepReport,
};
pub use error::{CheckoutError, CollaboratorError, StoreError};
pub use order::{Order, OrderItem, OrderStatus};
pub use postgres::{DbPool, PgOrderStore};
pub use store::{
    InMemoryOrderStore, NewReconciliationFlag, OrderStore, ReconciliationAction,
    ReconciliationFlag,
};
