use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::OrderEvent;
use uuid::Uuid;

use crate::order::{Order, OrderItem, OrderStatus};
use crate::store::{ReconciliationAction, ReconciliationFlag};

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_time: DateTime<Utc>,
    pub total_amount: BigDecimal,
    pub status: String,
    pub shipping_address: String,
    pub payment_method: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrderRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_time: DateTime<Utc>,
    pub total_amount: BigDecimal,
    pub status: String,
    pub shipping_address: String,
    pub payment_method: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Identifiable, Associations)]
#[diesel(belongs_to(OrderRow, foreign_key = order_id))]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(primary_key(order_id, product_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItemRow {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price_at_time_of_order: BigDecimal,
}

impl From<&Order> for NewOrderRow {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            order_time: order.order_time,
            total_amount: order.total_amount.clone(),
            status: order.status.as_str().to_string(),
            shipping_address: order.shipping_address.clone(),
            payment_method: order.payment_method.clone(),
        }
    }
}

impl OrderItemRow {
    pub fn for_order(order: &Order) -> Vec<Self> {
        order
            .items
            .iter()
            .map(|item| Self {
                order_id: order.id,
                product_id: item.product_id,
                quantity: item.quantity,
                price_at_time_of_order: item.price_at_time_of_order.clone(),
            })
            .collect()
    }
}

impl OrderRow {
    pub fn into_order(self, items: Vec<OrderItemRow>) -> anyhow::Result<Order> {
        let status = OrderStatus::parse(&self.status)
            .ok_or_else(|| anyhow::anyhow!("unknown order status {}", self.status))?;
        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            order_time: self.order_time,
            total_amount: self.total_amount,
            status,
            shipping_address: self.shipping_address,
            payment_method: self.payment_method,
            items: items
                .into_iter()
                .map(|row| OrderItem {
                    product_id: row.product_id,
                    quantity: row.quantity,
                    price_at_time_of_order: row.price_at_time_of_order,
                })
                .collect(),
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::outbox_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

impl TryFrom<&OrderEvent> for NewOutboxEvent {
    type Error = serde_json::Error;

    fn try_from(event: &OrderEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            id: event.id,
            aggregate_id: event.order_id,
            event_type: event.event_type.as_str().to_string(),
            event_data: serde_json::to_value(event)?,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::reconciliation_flags)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ReconciliationFlagRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub action: String,
    pub product_id: Uuid,
    pub quantity: i32,
    pub reason: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ReconciliationFlagRow {
    pub fn into_flag(self) -> anyhow::Result<ReconciliationFlag> {
        let action = ReconciliationAction::parse(&self.action)
            .ok_or_else(|| anyhow::anyhow!("unknown reconciliation action {}", self.action))?;
        Ok(ReconciliationFlag {
            id: self.id,
            order_id: self.order_id,
            action,
            product_id: self.product_id,
            quantity: self.quantity,
            reason: self.reason,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::reconciliation_flags)]
pub struct NewReconciliationFlagRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub action: String,
    pub product_id: Uuid,
    pub quantity: i32,
    pub reason: String,
}
