use shared::LedgerError;
use thiserror::Error;
use uuid::Uuid;

use crate::order::OrderStatus;

/// Errors from the order store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("order {0} already exists")]
    DuplicateOrder(Uuid),

    /// `from` did not match the persisted status; another writer got there first.
    #[error("order {order_id} expected {expected} before moving to {to}, found {actual}")]
    StaleTransition {
        order_id: Uuid,
        expected: OrderStatus,
        actual: OrderStatus,
        to: OrderStatus,
    },

    #[error("order {order_id} cannot move from {from} to {to}")]
    IllegalTransition {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("order storage error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn database(reason: impl ToString) -> Self {
        StoreError::Database(reason.to_string())
    }
}

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Failure reported by a catalog, user, payment or event collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("not found")]
    NotFound,

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("unreachable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        CollaboratorError::Unavailable(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("invalid checkout request: {0}")]
    Validation(String),

    #[error("unknown user {0}")]
    UserNotFound(Uuid),

    #[error("unknown product {0}")]
    ProductNotFound(Uuid),

    #[error(
        "insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("order {order_id} cannot move to {to}: status is {actual}")]
    InvalidTransition {
        order_id: Uuid,
        actual: OrderStatus,
        to: OrderStatus,
    },

    #[error("{service} unavailable: {reason}")]
    ServiceUnavailable {
        service: &'static str,
        reason: String,
    },

    #[error("inventory ledger rejected the request: {0}")]
    Inventory(String),

    #[error("order store error: {0}")]
    Store(String),
}

impl CheckoutError {
    pub fn unavailable(service: &'static str, reason: impl ToString) -> Self {
        CheckoutError::ServiceUnavailable {
            service,
            reason: reason.to_string(),
        }
    }

    pub fn shortfall(&self) -> Option<i32> {
        match self {
            CheckoutError::InsufficientStock {
                requested,
                available,
                ..
            } => Some(requested - available),
            _ => None,
        }
    }
}

impl From<LedgerError> for CheckoutError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientStock {
                product_id,
                requested,
                available,
            } => CheckoutError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            LedgerError::ProductNotFound { product_id } => {
                CheckoutError::ProductNotFound(product_id)
            }
            LedgerError::Unavailable { reason } => CheckoutError::unavailable("inventory", reason),
            other => CheckoutError::Inventory(other.to_string()),
        }
    }
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OrderNotFound(id) => CheckoutError::OrderNotFound(id),
            StoreError::StaleTransition {
                order_id,
                actual,
                to,
                ..
            } => CheckoutError::InvalidTransition {
                order_id,
                actual,
                to,
            },
            StoreError::IllegalTransition { order_id, from, to } => {
                CheckoutError::InvalidTransition {
                    order_id,
                    actual: from,
                    to,
                }
            }
            StoreError::Database(reason) => CheckoutError::unavailable("order store", reason),
            other => CheckoutError::Store(other.to_string()),
        }
    }
}
