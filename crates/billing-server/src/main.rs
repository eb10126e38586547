//! Billing HTTP Server
//!
//! Axum server exposing push-payment initiation, status polling, the M-Pesa
//! result webhook and subscription serviceability.

mod config;
mod handlers;
mod routes;
mod state;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use billing_core::PaymentGateway;
use billing_gateway::DarajaGateway;
use billing_payments::{EventPublisher, LogNotificationSink, NotificationDispatcher};

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env()?;

    // Initialize gateway
    let gateway: Option<Arc<dyn PaymentGateway>> = match DarajaGateway::from_env() {
        Ok(gateway) => {
            tracing::info!(base_url = %gateway.config().base_url, "✓ Daraja gateway configured");
            Some(Arc::new(gateway))
        }
        Err(e) => {
            tracing::warn!(error = %e, "⚠ Daraja not configured - payment initiation disabled");
            tracing::warn!(
                "  Set MPESA_CONSUMER_KEY, MPESA_CONSUMER_SECRET, MPESA_SHORTCODE, MPESA_PASSKEY \
                 and MPESA_CALLBACK_URL in .env"
            );
            None
        }
    };

    if config.callback_token.is_none() {
        tracing::warn!("MPESA_CALLBACK_TOKEN not set - callbacks are accepted without a token");
    }

    // Notifications run independently of reconciliation
    let (events, rx) = EventPublisher::channel();
    let _dispatcher = NotificationDispatcher::spawn(rx, Arc::new(LogNotificationSink));

    // Build application state
    let state = AppState::new(gateway, events, &config);
    let _sweep = state.ledger.clone().spawn_lapse_sweep(config.lapse_sweep_every);

    let app = routes::router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("billing-server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                        - Health check");
    tracing::info!("  POST /api/payments                  - Start push payment");
    tracing::info!("  GET  /api/payments/{{id}}             - Poll payment status");
    tracing::info!("  GET  /api/businesses/{{id}}/payments  - Payment history");
    tracing::info!("  GET  /api/subscriptions/{{id}}        - Serviceability");
    tracing::info!("  GET  /api/reconciliation/backlog    - Manual reconciliation queue");
    tracing::info!("  POST /webhook/mpesa                 - Gateway result callback");

    axum::serve(listener, app).await?;

    Ok(())
}
