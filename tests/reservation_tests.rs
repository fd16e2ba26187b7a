use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use encore_server::models::{Concert, ConcertSnapshot, NewConcert, NewOrder, Order, OrderStatus};
use encore_server::service::{
    CancelError, CancelOutcome, PurchaseError, ReservationService, RetryPolicy,
};
use encore_server::stores::{
    CatalogError, ConcertCatalog, InventoryError, InventoryStore, LedgerError, MemoryStore,
    OrderLedger,
};

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

fn seeded_store(total: i32) -> (Arc<MemoryStore>, Concert) {
    let store = Arc::new(MemoryStore::new());
    let concert = store.add_concert(NewConcert {
        title: "Midnight Echoes".to_string(),
        venue: "The Armory".to_string(),
        starts_at: Utc::now(),
        ticket_price: Decimal::new(4500, 2),
        tickets_total: total,
    });
    (store, concert)
}

fn service_over(store: &Arc<MemoryStore>) -> Arc<ReservationService> {
    Arc::new(ReservationService::new(
        store.clone(),
        store.clone(),
        store.clone(),
    ))
}

/// The accounting identity the whole design protects: remaining stock is
/// the total minus everything currently held by active orders.
fn assert_stock_identity(store: &MemoryStore, concert: &Concert) {
    let remaining = store.tickets_remaining(concert.id).unwrap();
    assert!(remaining >= 0, "remaining stock went negative");
    assert!(remaining <= concert.tickets_total, "remaining stock overflowed");
    assert_eq!(
        remaining,
        concert.tickets_total - store.active_quantity(concert.id)
    );
}

// Consumes one scripted failure; returns false once the budget is spent.
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Inventory wrapper that fails a scripted number of calls with
/// `Unavailable` before delegating to the real store.
struct FlakyInventory {
    inner: Arc<MemoryStore>,
    reserve_failures: AtomicU32,
    release_failures: AtomicU32,
}

impl FlakyInventory {
    fn new(inner: Arc<MemoryStore>, reserve_failures: u32, release_failures: u32) -> Self {
        Self {
            inner,
            reserve_failures: AtomicU32::new(reserve_failures),
            release_failures: AtomicU32::new(release_failures),
        }
    }
}

#[async_trait]
impl InventoryStore for FlakyInventory {
    async fn try_reserve(&self, concert_id: Uuid, quantity: i32) -> Result<(), InventoryError> {
        if take_failure(&self.reserve_failures) {
            return Err(InventoryError::Unavailable("scripted outage".to_string()));
        }
        self.inner.try_reserve(concert_id, quantity).await
    }

    async fn release(&self, concert_id: Uuid, quantity: i32) -> Result<(), InventoryError> {
        if take_failure(&self.release_failures) {
            return Err(InventoryError::Unavailable("scripted outage".to_string()));
        }
        self.inner.release(concert_id, quantity).await
    }
}

/// Ledger wrapper whose `create_order` fails a scripted number of times.
struct FlakyLedger {
    inner: Arc<MemoryStore>,
    create_failures: AtomicU32,
}

impl FlakyLedger {
    fn new(inner: Arc<MemoryStore>, create_failures: u32) -> Self {
        Self {
            inner,
            create_failures: AtomicU32::new(create_failures),
        }
    }
}

#[async_trait]
impl OrderLedger for FlakyLedger {
    async fn create_order(&self, new_order: NewOrder) -> Result<Order, LedgerError> {
        if take_failure(&self.create_failures) {
            return Err(LedgerError::Unavailable("scripted outage".to_string()));
        }
        self.inner.create_order(new_order).await
    }

    async fn mark_cancelled(&self, order_id: Uuid) -> Result<Order, LedgerError> {
        self.inner.mark_cancelled(order_id).await
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Order, LedgerError> {
        self.inner.get_order(order_id).await
    }
}

/// Catalog wrapper that fails a scripted number of lookups.
struct FlakyCatalog {
    inner: Arc<MemoryStore>,
    failures: AtomicU32,
}

#[async_trait]
impl ConcertCatalog for FlakyCatalog {
    async fn get_concert(
        &self,
        concert_id: Uuid,
    ) -> Result<Option<ConcertSnapshot>, CatalogError> {
        if take_failure(&self.failures) {
            return Err(CatalogError::Unavailable("scripted outage".to_string()));
        }
        self.inner.get_concert(concert_id).await
    }
}

async fn drain_pending_releases(service: &ReservationService) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.pending_releases() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("owed releases never drained");
}

#[tokio::test]
async fn purchase_decrements_stock_and_snapshots_price() {
    let (store, concert) = seeded_store(10);
    let service = service_over(&store);
    let user_id = Uuid::new_v4();

    let order = service
        .purchase_tickets(user_id, concert.id, 4)
        .await
        .unwrap();

    assert_eq!(order.user_id, user_id);
    assert_eq!(order.concert_id, concert.id);
    assert_eq!(order.quantity, 4);
    assert_eq!(order.status, OrderStatus::Active);
    assert_eq!(order.unit_price, Decimal::new(4500, 2));
    assert_eq!(order.total_price, Decimal::new(18000, 2));
    assert_eq!(store.tickets_remaining(concert.id), Some(6));
    assert_stock_identity(&store, &concert);
}

// A rejected purchase leaves the count exactly where it was.
#[tokio::test]
async fn oversized_purchase_is_rejected_without_touching_stock() {
    let (store, concert) = seeded_store(10);
    let service = service_over(&store);

    service
        .purchase_tickets(Uuid::new_v4(), concert.id, 4)
        .await
        .unwrap();
    assert_eq!(store.tickets_remaining(concert.id), Some(6));

    let err = service
        .purchase_tickets(Uuid::new_v4(), concert.id, 7)
        .await
        .unwrap_err();
    assert_eq!(err, PurchaseError::InsufficientStock);
    assert_eq!(store.tickets_remaining(concert.id), Some(6));
    assert_stock_identity(&store, &concert);
}

#[tokio::test]
async fn zero_and_negative_quantities_are_rejected_without_side_effects() {
    let (store, concert) = seeded_store(10);
    let service = service_over(&store);

    for quantity in [0, -3] {
        let err = service
            .purchase_tickets(Uuid::new_v4(), concert.id, quantity)
            .await
            .unwrap_err();
        assert_eq!(err, PurchaseError::InvalidQuantity);
    }
    assert_eq!(store.tickets_remaining(concert.id), Some(10));
    assert_eq!(store.order_count(), 0);
}

// An unknown concert produces no order at all.
#[tokio::test]
async fn purchase_against_unknown_concert_is_rejected() {
    let (store, _concert) = seeded_store(10);
    let service = service_over(&store);

    let err = service
        .purchase_tickets(Uuid::new_v4(), Uuid::new_v4(), 2)
        .await
        .unwrap_err();
    assert_eq!(err, PurchaseError::ConcertNotFound);
    assert_eq!(store.order_count(), 0);
}

// Two concurrent purchases of 6 against a stock of 10: exactly one wins.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_purchases_cannot_jointly_oversell() {
    let (store, concert) = seeded_store(10);
    let service = service_over(&store);

    let concert_id = concert.id;
    let a = {
        let service = service.clone();
        tokio::spawn(async move { service.purchase_tickets(Uuid::new_v4(), concert_id, 6).await })
    };
    let b = {
        let service = service.clone();
        tokio::spawn(async move { service.purchase_tickets(Uuid::new_v4(), concert_id, 6).await })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let rejections = results
        .iter()
        .filter(|r| matches!(r, Err(PurchaseError::InsufficientStock)))
        .count();

    assert_eq!(successes, 1);
    assert_eq!(rejections, 1);
    assert_eq!(store.tickets_remaining(concert.id), Some(4));
    assert_stock_identity(&store, &concert);
}

// N concurrent buyers of q tickets against stock S: exactly floor(S/q)
// orders can exist afterwards, no matter how the tasks interleave.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn purchase_storm_sells_exactly_the_available_stock() {
    let (store, concert) = seeded_store(100);
    let service = service_over(&store);

    let concert_id = concert.id;
    let mut tasks = Vec::new();
    for _ in 0..50 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            service.purchase_tickets(Uuid::new_v4(), concert_id, 3).await
        }));
    }

    let mut successes = 0;
    let mut rejections = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(PurchaseError::InsufficientStock) => rejections += 1,
            Err(other) => panic!("unexpected purchase failure: {other}"),
        }
    }

    assert_eq!(successes, 33);
    assert_eq!(rejections, 17);
    assert_eq!(store.tickets_remaining(concert.id), Some(1));
    assert_stock_identity(&store, &concert);
}

// Purchase then cancel restores the count; the second cancel is a no-op.
#[tokio::test]
async fn cancel_restores_stock_exactly_once() {
    let (store, concert) = seeded_store(10);
    let service = service_over(&store);

    let order = service
        .purchase_tickets(Uuid::new_v4(), concert.id, 3)
        .await
        .unwrap();
    assert_eq!(store.tickets_remaining(concert.id), Some(7));

    let outcome = service.cancel_order(order.id).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::Cancelled(_)));
    assert_eq!(outcome.order().status, OrderStatus::Cancelled);
    assert_eq!(store.tickets_remaining(concert.id), Some(10));

    let outcome = service.cancel_order(order.id).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::AlreadyCancelled(_)));
    assert_eq!(store.tickets_remaining(concert.id), Some(10));
    assert_stock_identity(&store, &concert);
}

#[tokio::test]
async fn cancelling_unknown_order_is_rejected() {
    let (store, _concert) = seeded_store(10);
    let service = service_over(&store);

    let err = service.cancel_order(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err, CancelError::NotFound);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancels_release_stock_exactly_once() {
    let (store, concert) = seeded_store(10);
    let service = service_over(&store);

    let order = service
        .purchase_tickets(Uuid::new_v4(), concert.id, 4)
        .await
        .unwrap();

    let order_id = order.id;
    let a = {
        let service = service.clone();
        tokio::spawn(async move { service.cancel_order(order_id).await })
    };
    let b = {
        let service = service.clone();
        tokio::spawn(async move { service.cancel_order(order_id).await })
    };

    let results = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
    let wins = results
        .iter()
        .filter(|o| matches!(o, CancelOutcome::Cancelled(_)))
        .count();
    let noops = results
        .iter()
        .filter(|o| matches!(o, CancelOutcome::AlreadyCancelled(_)))
        .count();

    assert_eq!(wins, 1);
    assert_eq!(noops, 1);
    assert_eq!(store.tickets_remaining(concert.id), Some(10));
    assert_stock_identity(&store, &concert);
}

// The one compensating-action path: a reservation that cannot become an
// order must be undone before the failure is reported.
#[tokio::test]
async fn failed_order_creation_compensates_the_reservation() {
    let (store, concert) = seeded_store(10);
    let ledger = Arc::new(FlakyLedger::new(store.clone(), u32::MAX));
    let service = ReservationService::with_policy(
        store.clone(),
        ledger,
        store.clone(),
        fast_policy(),
    );

    let err = service
        .purchase_tickets(Uuid::new_v4(), concert.id, 4)
        .await
        .unwrap_err();

    assert_eq!(err, PurchaseError::Unavailable);
    assert_eq!(store.tickets_remaining(concert.id), Some(10));
    assert_eq!(store.order_count(), 0);
    assert_stock_identity(&store, &concert);
}

#[tokio::test]
async fn transient_inventory_outage_is_retried_to_success() {
    let (store, concert) = seeded_store(10);
    let inventory = Arc::new(FlakyInventory::new(store.clone(), 2, 0));
    let service = ReservationService::with_policy(
        inventory,
        store.clone(),
        store.clone(),
        fast_policy(),
    );

    let order = service
        .purchase_tickets(Uuid::new_v4(), concert.id, 2)
        .await
        .unwrap();
    assert_eq!(order.quantity, 2);
    assert_eq!(store.tickets_remaining(concert.id), Some(8));
}

#[tokio::test]
async fn transient_catalog_outage_is_retried_to_success() {
    let (store, concert) = seeded_store(10);
    let catalog = Arc::new(FlakyCatalog {
        inner: store.clone(),
        failures: AtomicU32::new(2),
    });
    let service = ReservationService::with_policy(
        store.clone(),
        store.clone(),
        catalog,
        fast_policy(),
    );

    let order = service
        .purchase_tickets(Uuid::new_v4(), concert.id, 1)
        .await
        .unwrap();
    assert_eq!(order.unit_price, Decimal::new(4500, 2));
}

#[tokio::test]
async fn exhausted_retries_surface_as_unavailable() {
    let (store, concert) = seeded_store(10);
    let inventory = Arc::new(FlakyInventory::new(store.clone(), u32::MAX, 0));
    let service = ReservationService::with_policy(
        inventory,
        store.clone(),
        store.clone(),
        fast_policy(),
    );

    let err = service
        .purchase_tickets(Uuid::new_v4(), concert.id, 2)
        .await
        .unwrap_err();
    assert_eq!(err, PurchaseError::Unavailable);
    assert_eq!(store.tickets_remaining(concert.id), Some(10));
}

// A release that keeps failing after the ledger committed is owed, not
// dropped: the queue retries it until the store recovers.
#[tokio::test]
async fn owed_release_is_retried_until_stock_is_restored() {
    let (store, concert) = seeded_store(10);
    // More failures than the inline retry budget, so the release lands on
    // the queue before eventually succeeding.
    let inventory = Arc::new(FlakyInventory::new(store.clone(), 0, 10));
    let service = ReservationService::with_policy(
        inventory,
        store.clone(),
        store.clone(),
        fast_policy(),
    );

    let order = service
        .purchase_tickets(Uuid::new_v4(), concert.id, 3)
        .await
        .unwrap();
    assert_eq!(store.tickets_remaining(concert.id), Some(7));

    let outcome = service.cancel_order(order.id).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::Cancelled(_)));

    drain_pending_releases(&service).await;
    assert_eq!(store.tickets_remaining(concert.id), Some(10));
    assert_stock_identity(&store, &concert);
}

// Purchase then cancel is a round trip for the stock counter.
#[tokio::test]
async fn purchase_cancel_round_trip_preserves_the_identity() {
    let (store, concert) = seeded_store(25);
    let service = service_over(&store);

    let mut orders = Vec::new();
    for quantity in [5, 3, 8] {
        orders.push(
            service
                .purchase_tickets(Uuid::new_v4(), concert.id, quantity)
                .await
                .unwrap(),
        );
        assert_stock_identity(&store, &concert);
    }
    assert_eq!(store.tickets_remaining(concert.id), Some(9));

    for order in &orders {
        service.cancel_order(order.id).await.unwrap();
        assert_stock_identity(&store, &concert);
    }
    assert_eq!(store.tickets_remaining(concert.id), Some(25));
}
