use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{NewOrder, Order};
use crate::stores::{
    CatalogError, ConcertCatalog, InventoryError, InventoryStore, LedgerError, OrderLedger,
};

use super::releases::{OwedRelease, ReleaseQueue};
use super::retry::{with_retry, RetryPolicy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PurchaseError {
    #[error("quantity must be a positive number of tickets")]
    InvalidQuantity,

    #[error("concert not found")]
    ConcertNotFound,

    #[error("not enough tickets remaining")]
    InsufficientStock,

    #[error("reservation service unavailable, try again later")]
    Unavailable,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CancelError {
    #[error("order not found")]
    NotFound,

    #[error("reservation service unavailable, try again later")]
    Unavailable,
}

#[derive(Debug)]
pub enum CancelOutcome {
    Cancelled(Order),
    /// The order was already terminal. The desired end state holds and this
    /// call released no stock.
    AlreadyCancelled(Order),
}

impl CancelOutcome {
    pub fn order(&self) -> &Order {
        match self {
            CancelOutcome::Cancelled(order) | CancelOutcome::AlreadyCancelled(order) => order,
        }
    }
}

/// Orchestrates the purchase and cancellation sagas over the inventory
/// store and the order ledger.
///
/// The two stores cannot be updated in one physical transaction, so the
/// service fixes the ordering instead: the stock decrement always precedes
/// order creation, and the status flip always precedes the stock release.
/// Whenever the second step cannot complete, the decrement is undone (or the
/// owed release queued), which keeps every concert at
/// `tickets_remaining = tickets_total - sum(quantity of active orders)`.
pub struct ReservationService {
    inventory: Arc<dyn InventoryStore>,
    ledger: Arc<dyn OrderLedger>,
    catalog: Arc<dyn ConcertCatalog>,
    releases: ReleaseQueue,
    policy: RetryPolicy,
}

impl ReservationService {
    pub fn new(
        inventory: Arc<dyn InventoryStore>,
        ledger: Arc<dyn OrderLedger>,
        catalog: Arc<dyn ConcertCatalog>,
    ) -> Self {
        Self::with_policy(inventory, ledger, catalog, RetryPolicy::default())
    }

    pub fn with_policy(
        inventory: Arc<dyn InventoryStore>,
        ledger: Arc<dyn OrderLedger>,
        catalog: Arc<dyn ConcertCatalog>,
        policy: RetryPolicy,
    ) -> Self {
        let releases = ReleaseQueue::spawn(inventory.clone(), policy);
        Self {
            inventory,
            ledger,
            catalog,
            releases,
            policy,
        }
    }

    /// Releases still owed to the inventory after exhausted inline retries.
    pub fn pending_releases(&self) -> usize {
        self.releases.pending()
    }

    pub async fn purchase_tickets(
        &self,
        user_id: Uuid,
        concert_id: Uuid,
        quantity: i32,
    ) -> Result<Order, PurchaseError> {
        if quantity <= 0 {
            debug!(%user_id, %concert_id, quantity, "purchase rejected, invalid quantity");
            return Err(PurchaseError::InvalidQuantity);
        }

        let snapshot = with_retry(&self.policy, CatalogError::is_transient, || {
            let catalog = self.catalog.clone();
            async move { catalog.get_concert(concert_id).await }
        })
        .await
        .map_err(|e| {
            error!(%concert_id, error = %e, "concert catalog unavailable");
            PurchaseError::Unavailable
        })?;

        let Some(snapshot) = snapshot else {
            debug!(%concert_id, "purchase rejected, concert not found");
            return Err(PurchaseError::ConcertNotFound);
        };

        let new_order = NewOrder {
            user_id,
            concert_id,
            quantity,
            unit_price: snapshot.ticket_price,
        };

        // The reserve/create pair runs on its own task: a caller that
        // abandons the request mid-flight cannot strand the decrement.
        // Either the order becomes visible or the compensation fires.
        let task = tokio::spawn(Self::reserve_and_create(
            self.inventory.clone(),
            self.ledger.clone(),
            self.releases.clone(),
            self.policy,
            new_order,
        ));
        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(%concert_id, error = %e, "purchase task failed");
                Err(PurchaseError::Unavailable)
            }
        }
    }

    async fn reserve_and_create(
        inventory: Arc<dyn InventoryStore>,
        ledger: Arc<dyn OrderLedger>,
        releases: ReleaseQueue,
        policy: RetryPolicy,
        new_order: NewOrder,
    ) -> Result<Order, PurchaseError> {
        let concert_id = new_order.concert_id;
        let quantity = new_order.quantity;

        let reserved = with_retry(&policy, InventoryError::is_transient, || {
            let inventory = inventory.clone();
            async move { inventory.try_reserve(concert_id, quantity).await }
        })
        .await;

        match reserved {
            Ok(()) => {}
            Err(InventoryError::InsufficientStock) => {
                debug!(%concert_id, quantity, "purchase rejected, insufficient stock");
                return Err(PurchaseError::InsufficientStock);
            }
            // The concert disappeared between the catalog lookup and the
            // reservation.
            Err(InventoryError::NotFound) => {
                debug!(%concert_id, "purchase rejected, concert not found");
                return Err(PurchaseError::ConcertNotFound);
            }
            Err(e @ InventoryError::Unavailable(_)) => {
                error!(%concert_id, error = %e, "inventory store unavailable");
                return Err(PurchaseError::Unavailable);
            }
        }

        let created = with_retry(&policy, LedgerError::is_transient, || {
            let ledger = ledger.clone();
            let new_order = new_order.clone();
            async move { ledger.create_order(new_order).await }
        })
        .await;

        match created {
            Ok(order) => {
                info!(
                    order_id = %order.id,
                    %concert_id,
                    quantity,
                    total = %order.total_price,
                    "purchase completed"
                );
                Ok(order)
            }
            Err(e) => {
                // Stock is decremented but no order exists; undo the
                // decrement before reporting failure.
                error!(%concert_id, error = %e, "ledger write failed after reservation, compensating");
                release_or_enqueue(&inventory, &releases, &policy, concert_id, quantity).await;
                Err(PurchaseError::Unavailable)
            }
        }
    }

    pub async fn cancel_order(&self, order_id: Uuid) -> Result<CancelOutcome, CancelError> {
        // Same abandonment guard as the purchase path: once the status
        // flips, the release must run whether or not the caller is still
        // waiting.
        let task = tokio::spawn(Self::flip_and_release(
            self.inventory.clone(),
            self.ledger.clone(),
            self.releases.clone(),
            self.policy,
            order_id,
        ));
        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(%order_id, error = %e, "cancel task failed");
                Err(CancelError::Unavailable)
            }
        }
    }

    async fn flip_and_release(
        inventory: Arc<dyn InventoryStore>,
        ledger: Arc<dyn OrderLedger>,
        releases: ReleaseQueue,
        policy: RetryPolicy,
        order_id: Uuid,
    ) -> Result<CancelOutcome, CancelError> {
        let flipped = with_retry(&policy, LedgerError::is_transient, || {
            let ledger = ledger.clone();
            async move { ledger.mark_cancelled(order_id).await }
        })
        .await;

        let order = match flipped {
            Ok(order) => order,
            Err(LedgerError::AlreadyCancelled) => {
                let order = with_retry(&policy, LedgerError::is_transient, || {
                    let ledger = ledger.clone();
                    async move { ledger.get_order(order_id).await }
                })
                .await
                .map_err(|e| match e {
                    LedgerError::NotFound => CancelError::NotFound,
                    other => {
                        error!(%order_id, error = %other, "order ledger unavailable");
                        CancelError::Unavailable
                    }
                })?;
                debug!(%order_id, "cancel is a no-op, order already cancelled");
                return Ok(CancelOutcome::AlreadyCancelled(order));
            }
            Err(LedgerError::NotFound) => {
                debug!(%order_id, "cancel rejected, order not found");
                return Err(CancelError::NotFound);
            }
            Err(e @ LedgerError::Unavailable(_)) => {
                error!(%order_id, error = %e, "order ledger unavailable");
                return Err(CancelError::Unavailable);
            }
        };

        // The ledger has committed to Cancelled; from here the release is
        // owed and must eventually complete.
        release_or_enqueue(&inventory, &releases, &policy, order.concert_id, order.quantity).await;
        info!(
            order_id = %order.id,
            concert_id = %order.concert_id,
            quantity = order.quantity,
            "order cancelled"
        );
        Ok(CancelOutcome::Cancelled(order))
    }
}

async fn release_or_enqueue(
    inventory: &Arc<dyn InventoryStore>,
    releases: &ReleaseQueue,
    policy: &RetryPolicy,
    concert_id: Uuid,
    quantity: i32,
) {
    let released = with_retry(policy, InventoryError::is_transient, || {
        let inventory = inventory.clone();
        async move { inventory.release(concert_id, quantity).await }
    })
    .await;

    match released {
        Ok(()) => {}
        Err(InventoryError::NotFound) => {
            error!(%concert_id, quantity, "release target missing, stock cannot be restored");
        }
        Err(e) => {
            warn!(%concert_id, quantity, error = %e, "inline release failed, queueing owed release");
            releases.enqueue(OwedRelease {
                concert_id,
                quantity,
            });
        }
    }
}
