use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::service::ReservationService;
use crate::utils::response::success;

pub mod orders;

#[derive(Clone)]
pub struct AppState {
    pub reservations: Arc<ReservationService>,
}

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "encore-api",
    };

    success(payload, "Health check successful").into_response()
}
