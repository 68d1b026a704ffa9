//! Order aggregate and its status state machine.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use shared::ReservationToken;
use uuid::Uuid;

/// Status of an order.
///
/// ```text
/// PENDING ──► PROCESSING ──► SHIPPED ──► DELIVERED
///    │             │
///    ▼             ▼
/// CANCELLED     RETURNED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Returned,
}

impl OrderStatus {
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Processing)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Processing, OrderStatus::Shipped)
                | (OrderStatus::Processing, OrderStatus::Returned)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Returned
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Returned => "RETURNED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(OrderStatus::Pending),
            "PROCESSING" => Some(OrderStatus::Processing),
            "SHIPPED" => Some(OrderStatus::Shipped),
            "DELIVERED" => Some(OrderStatus::Delivered),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "RETURNED" => Some(OrderStatus::Returned),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Catalog price captured at checkout. Never recomputed.
    pub price_at_time_of_order: BigDecimal,
}

impl OrderItem {
    pub fn line_total(&self) -> BigDecimal {
        &self.price_at_time_of_order * BigDecimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_time: DateTime<Utc>,
    pub total_amount: BigDecimal,
    pub status: OrderStatus,
    pub shipping_address: String,
    pub payment_method: String,
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Builds a `PENDING` order whose total is the sum of its line totals.
    pub fn pending(
        id: Uuid,
        user_id: Uuid,
        items: Vec<OrderItem>,
        shipping_address: String,
        payment_method: String,
    ) -> Self {
        let total_amount = items
            .iter()
            .fold(BigDecimal::zero(), |acc, item| acc + item.line_total());
        Self {
            id,
            user_id,
            order_time: Utc::now(),
            total_amount,
            status: OrderStatus::Pending,
            shipping_address,
            payment_method,
            items,
        }
    }

    /// The ledger holds one reservation per line item, keyed by order and
    /// product.
    pub fn reservation_tokens(&self) -> Vec<ReservationToken> {
        self.items
            .iter()
            .map(|item| ReservationToken {
                order_id: self.id,
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect()
    }
}
