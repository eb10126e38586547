//! Router

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    create_payment, get_subscription, health_check, list_payments, mpesa_webhook, payment_status,
    reconciliation_backlog,
};
use crate::state::AppState;

/// Largest callback body read; the gateway's payloads are a few hundred bytes
pub const WEBHOOK_BODY_LIMIT: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health_check))

        // Payments
        .route("/api/payments", post(create_payment))
        .route("/api/payments/{id}", get(payment_status))
        .route("/api/businesses/{id}/payments", get(list_payments))

        // Subscriptions
        .route("/api/subscriptions/{id}", get(get_subscription))
        .route("/api/reconciliation/backlog", get(reconciliation_backlog))

        // Gateway callbacks
        .route(
            "/webhook/mpesa",
            post(mpesa_webhook).layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT)),
        )

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
