use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, with_security_headers};
use crate::handlers::{health_check, orders, AppState};

pub fn create_routes(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/api/orders", post(orders::purchase_tickets))
        .route("/api/orders/:order_id/cancel", post(orders::cancel_order))
        .with_state(state);

    with_security_headers(router).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(create_cors_layer()),
    )
}
