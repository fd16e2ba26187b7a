use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ConcertSnapshot, NewOrder, Order, OrderStatus};

use super::{
    CatalogError, ConcertCatalog, InventoryError, InventoryStore, LedgerError, OrderLedger,
};

const ORDER_COLUMNS: &str =
    "id, user_id, concert_id, quantity, unit_price, total_price, purchased_at, status, updated_at";

/// Postgres-backed store. Both check-and-set primitives are expressed as a
/// single conditional `UPDATE`, so the database serializes concurrent
/// callers on the row itself; there is no read-then-write window.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InventoryStore for PgStore {
    async fn try_reserve(&self, concert_id: Uuid, quantity: i32) -> Result<(), InventoryError> {
        let result = sqlx::query(
            "UPDATE concerts \
             SET tickets_remaining = tickets_remaining - $2, updated_at = now() \
             WHERE id = $1 AND tickets_remaining >= $2",
        )
        .bind(concert_id)
        .bind(quantity)
        .execute(&self.pool)
        .await
        .map_err(inventory_unavailable)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Zero rows: either the concert is gone or the stock did not cover
        // the request. Disambiguate with an existence probe.
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM concerts WHERE id = $1)")
                .bind(concert_id)
                .fetch_one(&self.pool)
                .await
                .map_err(inventory_unavailable)?;

        if exists {
            Err(InventoryError::InsufficientStock)
        } else {
            Err(InventoryError::NotFound)
        }
    }

    async fn release(&self, concert_id: Uuid, quantity: i32) -> Result<(), InventoryError> {
        let result = sqlx::query(
            "UPDATE concerts \
             SET tickets_remaining = tickets_remaining + $2, updated_at = now() \
             WHERE id = $1",
        )
        .bind(concert_id)
        .bind(quantity)
        .execute(&self.pool)
        .await
        .map_err(inventory_unavailable)?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(InventoryError::NotFound)
        }
    }
}

#[async_trait]
impl OrderLedger for PgStore {
    async fn create_order(&self, new_order: NewOrder) -> Result<Order, LedgerError> {
        let query = format!(
            "INSERT INTO orders \
             (id, user_id, concert_id, quantity, unit_price, total_price, purchased_at, status, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $7) \
             RETURNING {ORDER_COLUMNS}"
        );
        sqlx::query_as::<_, Order>(&query)
            .bind(Uuid::new_v4())
            .bind(new_order.user_id)
            .bind(new_order.concert_id)
            .bind(new_order.quantity)
            .bind(new_order.unit_price)
            .bind(new_order.total_price())
            .bind(Utc::now())
            .bind(OrderStatus::Active)
            .fetch_one(&self.pool)
            .await
            .map_err(ledger_unavailable)
    }

    async fn mark_cancelled(&self, order_id: Uuid) -> Result<Order, LedgerError> {
        let query = format!(
            "UPDATE orders SET status = 'cancelled', updated_at = now() \
             WHERE id = $1 AND status = 'active' \
             RETURNING {ORDER_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, Order>(&query)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ledger_unavailable)?;

        if let Some(order) = updated {
            return Ok(order);
        }

        let status: Option<OrderStatus> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(ledger_unavailable)?;

        match status {
            Some(OrderStatus::Cancelled) => Err(LedgerError::AlreadyCancelled),
            // The conditional update lost a race it should have won; let
            // the service retry.
            Some(OrderStatus::Active) => {
                Err(LedgerError::Unavailable("cancellation race lost".to_string()))
            }
            None => Err(LedgerError::NotFound),
        }
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Order, LedgerError> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        sqlx::query_as::<_, Order>(&query)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ledger_unavailable)?
            .ok_or(LedgerError::NotFound)
    }
}

#[async_trait]
impl ConcertCatalog for PgStore {
    async fn get_concert(
        &self,
        concert_id: Uuid,
    ) -> Result<Option<ConcertSnapshot>, CatalogError> {
        let row: Option<(Uuid, Decimal)> =
            sqlx::query_as("SELECT id, ticket_price FROM concerts WHERE id = $1")
                .bind(concert_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        Ok(row.map(|(id, ticket_price)| ConcertSnapshot { id, ticket_price }))
    }
}

fn inventory_unavailable(e: sqlx::Error) -> InventoryError {
    InventoryError::Unavailable(e.to_string())
}

fn ledger_unavailable(e: sqlx::Error) -> LedgerError {
    LedgerError::Unavailable(e.to_string())
}
