//! Storage seam for the ticket inventory and order ledger.
//!
//! The reservation service is written against these traits; the concrete
//! stores only report facts (success, conflict, not-found, unavailable) and
//! never decide business outcomes. Both primitives that mutate shared state
//! (`try_reserve`, `mark_cancelled`) are atomic check-and-set operations:
//! concurrent callers for the same concert or the same order must never both
//! observe the precondition and both apply the mutation.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ConcertSnapshot, NewOrder, Order};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum InventoryError {
    /// Remaining stock is smaller than the requested quantity. Terminal for
    /// the call; retrying with the same arguments cannot succeed.
    #[error("insufficient stock")]
    InsufficientStock,

    #[error("concert not found")]
    NotFound,

    /// Store-level failure (connectivity, serialization conflict the engine
    /// could not resolve). The only variant that is safe to retry.
    #[error("inventory store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("order not found")]
    NotFound,

    /// The order is already in its terminal state. The caller that receives
    /// this did not win the status flip and must not release stock.
    #[error("order already cancelled")]
    AlreadyCancelled,

    #[error("order ledger unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("concert catalog unavailable: {0}")]
    Unavailable(String),
}

impl InventoryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, InventoryError::Unavailable(_))
    }
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

impl CatalogError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Unavailable(_))
    }
}

/// Authoritative ticket counts, one record per concert.
///
/// `tickets_remaining` may only be mutated through these two primitives;
/// no caller may read a count and write a derived value back.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Atomically decrements `tickets_remaining` by `quantity` iff the
    /// remaining stock covers it; otherwise leaves the record untouched and
    /// reports [`InventoryError::InsufficientStock`].
    ///
    /// Precondition: `quantity > 0` (validated by the service layer).
    async fn try_reserve(&self, concert_id: Uuid, quantity: i32) -> Result<(), InventoryError>;

    /// Atomically increments `tickets_remaining` by `quantity`. Only ever
    /// called with the quantity of a prior successful reservation, so the
    /// count cannot climb past `tickets_total`.
    async fn release(&self, concert_id: Uuid, quantity: i32) -> Result<(), InventoryError>;
}

/// Durable record of orders. Orders are never deleted, only transitioned
/// to their terminal state.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Writes a new `Active` order with a fresh id and a `purchased_at`
    /// stamp. The stock check has already happened by the time this runs.
    async fn create_order(&self, new_order: NewOrder) -> Result<Order, LedgerError>;

    /// Atomically flips status `Active -> Cancelled` and returns the
    /// updated order. Exactly one of any set of concurrent callers wins;
    /// the rest see [`LedgerError::AlreadyCancelled`].
    async fn mark_cancelled(&self, order_id: Uuid) -> Result<Order, LedgerError>;

    async fn get_order(&self, order_id: Uuid) -> Result<Order, LedgerError>;
}

/// Read-only collaborator owned by the wider application. The core takes
/// the price snapshot and existence from it and nothing else.
#[async_trait]
pub trait ConcertCatalog: Send + Sync {
    async fn get_concert(
        &self,
        concert_id: Uuid,
    ) -> Result<Option<ConcertSnapshot>, CatalogError>;
}
