use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::service::CancelOutcome;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub user_id: Uuid,
    pub concert_id: Uuid,
    pub quantity: i32,
}

/// POST /api/orders
pub async fn purchase_tickets(
    State(state): State<AppState>,
    Json(req): Json<PurchaseRequest>,
) -> Result<Response, AppError> {
    let order = state
        .reservations
        .purchase_tickets(req.user_id, req.concert_id, req.quantity)
        .await?;

    Ok(created(order, "Tickets purchased").into_response())
}

/// POST /api/orders/:order_id/cancel
///
/// An already-cancelled order is reported as success: the end state the
/// caller asked for already holds, and no stock moved on this call.
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Response, AppError> {
    match state.reservations.cancel_order(order_id).await? {
        CancelOutcome::Cancelled(order) => Ok(success(order, "Order cancelled").into_response()),
        CancelOutcome::AlreadyCancelled(order) => {
            Ok(success(order, "Order was already cancelled").into_response())
        }
    }
}
