use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Concert {
    pub id: Uuid,
    pub title: String,
    pub venue: String,
    pub starts_at: DateTime<Utc>,
    pub ticket_price: Decimal,
    pub tickets_total: i32,
    pub tickets_remaining: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for seeding a concert. Stock starts full:
/// `tickets_remaining` is initialized to `tickets_total`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewConcert {
    pub title: String,
    pub venue: String,
    pub starts_at: DateTime<Utc>,
    pub ticket_price: Decimal,
    pub tickets_total: i32,
}

/// The slice of a concert the reservation path reads: existence plus the
/// price used for the order's snapshot. Nothing else from the catalog is
/// visible to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcertSnapshot {
    pub id: Uuid,
    pub ticket_price: Decimal,
}
