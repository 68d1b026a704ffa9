use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderEventType {
    OrderCreated,
    OrderProcessing,
    OrderCancelled,
    OrderShipped,
    OrderDelivered,
    OrderReturned,
}

impl OrderEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEventType::OrderCreated => "OrderCreated",
            OrderEventType::OrderProcessing => "OrderProcessing",
            OrderEventType::OrderCancelled => "OrderCancelled",
            OrderEventType::OrderShipped => "OrderShipped",
            OrderEventType::OrderDelivered => "OrderDelivered",
            OrderEventType::OrderReturned => "OrderReturned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OrderCreated" => Some(OrderEventType::OrderCreated),
            "OrderProcessing" => Some(OrderEventType::OrderProcessing),
            "OrderCancelled" => Some(OrderEventType::OrderCancelled),
            "OrderShipped" => Some(OrderEventType::OrderShipped),
            "OrderDelivered" => Some(OrderEventType::OrderDelivered),
            "OrderReturned" => Some(OrderEventType::OrderReturned),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain event emitted whenever an order changes state.
///
/// Delivery is at-least-once; consumers should dedupe on `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub id: Uuid,
    pub event_type: OrderEventType,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub total_amount: BigDecimal,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn new(
        event_type: OrderEventType,
        order_id: Uuid,
        user_id: Uuid,
        status: impl Into<String>,
        total_amount: BigDecimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            order_id,
            user_id,
            status: status.into(),
            total_amount,
            reason: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Succeeded => "SUCCEEDED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(PaymentStatus::Pending),
            "SUCCEEDED" => Some(PaymentStatus::Succeeded),
            "FAILED" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of a payment, published by the payment service once the
/// gateway webhook has moved the payment out of `PENDING`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub order_id: Uuid,
    pub transaction_ref: String,
    pub status: PaymentStatus,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl PaymentResult {
    pub fn succeeded(order_id: Uuid, transaction_ref: impl Into<String>) -> Self {
        Self {
            order_id,
            transaction_ref: transaction_ref.into(),
            status: PaymentStatus::Succeeded,
            reason: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn failed(
        order_id: Uuid,
        transaction_ref: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            transaction_ref: transaction_ref.into(),
            status: PaymentStatus::Failed,
            reason: Some(reason.into()),
            occurred_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_status_uses_upper_case_on_the_wire() {
        let json = serde_json::to_string(&PaymentStatus::Succeeded).unwrap();
        assert_eq!(json, "\"SUCCEEDED\"");
        assert_eq!(PaymentStatus::parse("FAILED"), Some(PaymentStatus::Failed));
        assert_eq!(PaymentStatus::parse("refunded"), None);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Succeeded.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }

    #[test]
    fn event_type_names_round_trip_through_parse() {
        for t in [
            OrderEventType::OrderCreated,
            OrderEventType::OrderProcessing,
            OrderEventType::OrderCancelled,
            OrderEventType::OrderShipped,
            OrderEventType::OrderDelivered,
            OrderEventType::OrderReturned,
        ] {
            assert_eq!(OrderEventType::parse(t.as_str()), Some(t));
        }
    }
}
