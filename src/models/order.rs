use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle state of an order. `Cancelled` is terminal: there is no
/// transition out of it and no re-activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Active,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub concert_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub purchased_at: DateTime<Utc>,
    pub status: OrderStatus,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for a ledger write. The ledger assigns the id, stamps
/// `purchased_at`, and derives `total_price` from the snapshot price.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub concert_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl NewOrder {
    pub fn total_price(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}
