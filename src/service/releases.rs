use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::stores::{InventoryError, InventoryStore};

use super::retry::RetryPolicy;

/// A release the service still owes the inventory: the ledger has already
/// committed (order cancelled, or order creation abandoned after a
/// reservation), so the stock increment must eventually land.
#[derive(Debug, Clone, Copy)]
pub struct OwedRelease {
    pub concert_id: Uuid,
    pub quantity: i32,
}

/// Background worker that retries owed releases until the store accepts
/// them. Jobs are never dropped on transient failure; the backoff is
/// capped, the attempts are not.
#[derive(Clone)]
pub struct ReleaseQueue {
    tx: mpsc::UnboundedSender<OwedRelease>,
    pending: Arc<AtomicUsize>,
}

impl ReleaseQueue {
    pub fn spawn(inventory: Arc<dyn InventoryStore>, policy: RetryPolicy) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<OwedRelease>();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_pending = pending.clone();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let mut attempt: u32 = 0;
                loop {
                    match inventory.release(job.concert_id, job.quantity).await {
                        Ok(()) => {
                            info!(
                                concert_id = %job.concert_id,
                                quantity = job.quantity,
                                "owed release completed"
                            );
                            break;
                        }
                        Err(InventoryError::NotFound) => {
                            // The concert record is gone out from under an
                            // order; there is no stock left to restore.
                            error!(
                                concert_id = %job.concert_id,
                                quantity = job.quantity,
                                "dropping owed release, concert no longer exists"
                            );
                            break;
                        }
                        Err(e) => {
                            warn!(
                                concert_id = %job.concert_id,
                                attempt,
                                error = %e,
                                "owed release failed, retrying"
                            );
                            tokio::time::sleep(policy.delay(attempt)).await;
                            attempt = attempt.saturating_add(1);
                        }
                    }
                }
                worker_pending.fetch_sub(1, Ordering::SeqCst);
            }
        });

        Self { tx, pending }
    }

    pub fn enqueue(&self, job: OwedRelease) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(rejected) = self.tx.send(job) {
            // The worker only exits when the runtime is shutting down.
            self.pending.fetch_sub(1, Ordering::SeqCst);
            error!(concert_id = %rejected.0.concert_id, "release queue worker is gone");
        }
    }

    /// Number of releases still owed. Drains to zero once the store
    /// recovers.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}
