//! # Routes
//!
//! Axum router configuration for the settlement API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - POST /checkout/session - Price the cart and register a hosted checkout
/// - POST /payments/webhook - Processor notification
/// - GET  /payments/webhook - Endpoint challenge
/// - POST /discounts/validate - Discount preview
/// - POST /bank-transfer/orders - Pending bank-transfer order
/// - GET  /health
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let payment_routes = Router::new().route(
        "/webhook",
        post(handlers::payment_webhook).get(handlers::webhook_challenge),
    );

    Router::new()
        .route("/health", get(handlers::health))
        .route("/checkout/session", post(handlers::create_checkout_session))
        .route("/discounts/validate", post(handlers::validate_discount))
        .route("/bank-transfer/orders", post(handlers::create_bank_transfer_order))
        .nest("/payments", payment_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
