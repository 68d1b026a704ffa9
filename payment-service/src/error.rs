use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment amount must be positive")]
    InvalidAmount,

    #[error("payment method must not be empty")]
    MissingPaymentMethod,

    #[error("webhook status must be terminal, got {0}")]
    NonTerminalStatus(String),

    #[error("unknown transaction {0}")]
    UnknownTransaction(String),

    #[error("payment storage error: {0}")]
    Storage(String),

    #[error("failed to publish payment result: {0}")]
    Publish(String),
}

impl PaymentError {
    pub fn storage(reason: impl ToString) -> Self {
        PaymentError::Storage(reason.to_string())
    }
}

impl From<diesel::result::Error> for PaymentError {
    fn from(err: diesel::result::Error) -> Self {
        PaymentError::Storage(err.to_string())
    }
}
