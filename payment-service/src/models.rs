use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::{PaymentResult, PaymentStatus};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub transaction_ref: String,
    pub amount: BigDecimal,
    pub payment_method: String,
    pub status: String,
    pub failure_reason: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn status(&self) -> PaymentStatus {
        PaymentStatus::parse(&self.status).unwrap_or(PaymentStatus::Pending)
    }

    /// The result message for a payment that has reached a terminal status.
    pub fn to_result(&self) -> Option<PaymentResult> {
        match self.status() {
            PaymentStatus::Pending => None,
            PaymentStatus::Succeeded => Some(PaymentResult::succeeded(
                self.order_id,
                self.transaction_ref.clone(),
            )),
            PaymentStatus::Failed => Some(PaymentResult::failed(
                self.order_id,
                self.transaction_ref.clone(),
                self.failure_reason
                    .clone()
                    .unwrap_or_else(|| "payment declined".to_string()),
            )),
        }
    }
}

#[derive(Debug, Clone, Insertable, Serialize)]
#[diesel(table_name = crate::schema::payments)]
pub struct NewPayment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub transaction_ref: String,
    pub amount: BigDecimal,
    pub payment_method: String,
    pub status: String,
}
