use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{Concert, ConcertSnapshot, NewConcert, NewOrder, Order, OrderStatus};

use super::{
    CatalogError, ConcertCatalog, InventoryError, InventoryStore, LedgerError, OrderLedger,
};

/// In-memory store backing the test suite and local runs.
///
/// Records are arena-style: the maps hand out per-record locks, and every
/// mutation happens inside that record's own critical section. The map-wide
/// locks are only held long enough to look up or insert an entry, so
/// operations on different concerts (or different orders) never contend.
#[derive(Default)]
pub struct MemoryStore {
    concerts: RwLock<HashMap<Uuid, Arc<Mutex<Concert>>>>,
    orders: RwLock<HashMap<Uuid, Arc<Mutex<Order>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_concert(&self, params: NewConcert) -> Concert {
        let now = Utc::now();
        let concert = Concert {
            id: Uuid::new_v4(),
            title: params.title,
            venue: params.venue,
            starts_at: params.starts_at,
            ticket_price: params.ticket_price,
            tickets_total: params.tickets_total,
            tickets_remaining: params.tickets_total,
            created_at: now,
            updated_at: now,
        };
        self.concerts
            .write()
            .unwrap()
            .insert(concert.id, Arc::new(Mutex::new(concert.clone())));
        concert
    }

    pub fn tickets_remaining(&self, concert_id: Uuid) -> Option<i32> {
        let record = self.concert_record(concert_id)?;
        let concert = record.lock().unwrap();
        Some(concert.tickets_remaining)
    }

    /// Sum of quantities across `Active` orders for a concert. Used by the
    /// tests to check the stock accounting identity.
    pub fn active_quantity(&self, concert_id: Uuid) -> i32 {
        self.orders
            .read()
            .unwrap()
            .values()
            .map(|record| {
                let order = record.lock().unwrap();
                if order.concert_id == concert_id && order.status == OrderStatus::Active {
                    order.quantity
                } else {
                    0
                }
            })
            .sum()
    }

    pub fn order_count(&self) -> usize {
        self.orders.read().unwrap().len()
    }

    fn concert_record(&self, concert_id: Uuid) -> Option<Arc<Mutex<Concert>>> {
        self.concerts.read().unwrap().get(&concert_id).cloned()
    }

    fn order_record(&self, order_id: Uuid) -> Option<Arc<Mutex<Order>>> {
        self.orders.read().unwrap().get(&order_id).cloned()
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn try_reserve(&self, concert_id: Uuid, quantity: i32) -> Result<(), InventoryError> {
        let record = self
            .concert_record(concert_id)
            .ok_or(InventoryError::NotFound)?;
        let mut concert = record.lock().unwrap();
        if concert.tickets_remaining < quantity {
            return Err(InventoryError::InsufficientStock);
        }
        concert.tickets_remaining -= quantity;
        concert.updated_at = Utc::now();
        Ok(())
    }

    async fn release(&self, concert_id: Uuid, quantity: i32) -> Result<(), InventoryError> {
        let record = self
            .concert_record(concert_id)
            .ok_or(InventoryError::NotFound)?;
        let mut concert = record.lock().unwrap();
        // Releases always mirror a prior reservation, so the count cannot
        // climb past the configured total.
        debug_assert!(concert.tickets_remaining + quantity <= concert.tickets_total);
        concert.tickets_remaining += quantity;
        concert.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl OrderLedger for MemoryStore {
    async fn create_order(&self, new_order: NewOrder) -> Result<Order, LedgerError> {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id: new_order.user_id,
            concert_id: new_order.concert_id,
            quantity: new_order.quantity,
            unit_price: new_order.unit_price,
            total_price: new_order.total_price(),
            purchased_at: now,
            status: OrderStatus::Active,
            updated_at: now,
        };
        self.orders
            .write()
            .unwrap()
            .insert(order.id, Arc::new(Mutex::new(order.clone())));
        Ok(order)
    }

    async fn mark_cancelled(&self, order_id: Uuid) -> Result<Order, LedgerError> {
        let record = self.order_record(order_id).ok_or(LedgerError::NotFound)?;
        let mut order = record.lock().unwrap();
        if order.status == OrderStatus::Cancelled {
            return Err(LedgerError::AlreadyCancelled);
        }
        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Order, LedgerError> {
        let record = self.order_record(order_id).ok_or(LedgerError::NotFound)?;
        let order = record.lock().unwrap();
        Ok(order.clone())
    }
}

#[async_trait]
impl ConcertCatalog for MemoryStore {
    async fn get_concert(
        &self,
        concert_id: Uuid,
    ) -> Result<Option<ConcertSnapshot>, CatalogError> {
        Ok(self.concert_record(concert_id).map(|record| {
            let concert = record.lock().unwrap();
            ConcertSnapshot {
                id: concert.id,
                ticket_price: concert.ticket_price,
            }
        }))
    }
}
