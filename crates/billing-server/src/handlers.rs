//! HTTP Handlers

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use billing_core::{BillingError, IntentId, IntentStatus, PaymentIntent, Serviceability};
use billing_payments::{
    BacklogEntry, BillingStore, CallbackAck, InitiatePayment, PaymentStatusView, PollPolicy,
};

use crate::state::{AppState, PaymentServices};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub gateway_configured: bool,
    pub gateway: Option<String>,
    pub backlog_size: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentCreated {
    /// Correlation id the client polls with
    pub intent_id: String,
    pub checkout_request_id: String,
    pub status: IntentStatus,
    pub customer_message: Option<String>,
    pub poll: PollPolicy,
}

#[derive(Debug, Deserialize)]
pub struct StatusQueryParams {
    #[serde(default)]
    pub attempt: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookParams {
    #[serde(default)]
    pub token: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Payments not configured")]
    PaymentsDisabled,

    #[error(transparent)]
    Billing(#[from] BillingError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::PaymentsDisabled => (StatusCode::SERVICE_UNAVAILABLE, "PAYMENTS_DISABLED"),
            ApiError::Billing(e) => match e {
                BillingError::InvalidPhone(_)
                | BillingError::InvalidAmount(_)
                | BillingError::Json(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
                BillingError::UnknownIntent(_) => (StatusCode::NOT_FOUND, "PAYMENT_NOT_FOUND"),
                BillingError::AccountNotFound(_) => {
                    (StatusCode::NOT_FOUND, "SUBSCRIPTION_NOT_FOUND")
                }
                BillingError::Credential(_) | BillingError::Network(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "GATEWAY_UNAVAILABLE")
                }
                BillingError::GatewayRejection { .. } | BillingError::MalformedResponse { .. } => {
                    (StatusCode::BAD_GATEWAY, "GATEWAY_REJECTED")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(code, error = %self, "Request failed");
        }

        let error = match &self {
            ApiError::PaymentsDisabled => self.to_string(),
            ApiError::Billing(e) => e.user_message(),
        };

        (status, Json(ErrorResponse { error, code: code.into() })).into_response()
    }
}

fn payments(state: &AppState) -> Result<&PaymentServices, ApiError> {
    state.payments.as_deref().ok_or(ApiError::PaymentsDisabled)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        gateway_configured: state.payments.is_some(),
        gateway: state.payments.as_ref().map(|p| p.gateway_name.clone()),
        backlog_size: state.backlog.len(),
    })
}

/// Start a push payment
pub async fn create_payment(
    State(state): State<AppState>,
    Json(payload): Json<InitiatePayment>,
) -> Result<(StatusCode, Json<PaymentCreated>), ApiError> {
    let payments = payments(&state)?;
    let initiated = payments.initiator.initiate(payload).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(PaymentCreated {
            intent_id: initiated.intent.id.to_string(),
            checkout_request_id: initiated.intent.checkout_key().to_string(),
            status: initiated.intent.status,
            customer_message: initiated.customer_message,
            poll: payments.poller.policy(),
        }),
    ))
}

/// Poll a payment
pub async fn payment_status(
    State(state): State<AppState>,
    Path(intent_id): Path<String>,
    Query(params): Query<StatusQueryParams>,
) -> Result<Json<PaymentStatusView>, ApiError> {
    let payments = payments(&state)?;
    let attempt = params.attempt.unwrap_or(1).max(1);

    let view = payments
        .poller
        .check_status(&IntentId::from_string(intent_id), attempt)
        .await?;

    Ok(Json(view))
}

/// Payment history of a business, newest first
pub async fn list_payments(
    State(state): State<AppState>,
    Path(business_id): Path<String>,
) -> Result<Json<Vec<PaymentIntent>>, ApiError> {
    Ok(Json(state.store.list_for_business(&business_id)?))
}

/// Serviceability for feature gating
pub async fn get_subscription(
    State(state): State<AppState>,
    Path(business_id): Path<String>,
) -> Result<Json<Serviceability>, ApiError> {
    Ok(Json(state.ledger.serviceability(&business_id)?))
}

/// Items waiting for manual reconciliation
pub async fn reconciliation_backlog(State(state): State<AppState>) -> Json<Vec<BacklogEntry>> {
    Json(state.backlog.list())
}

/// Gateway result callback. Always acknowledged.
///
/// Extractor failures are handled here rather than by axum so that an
/// unreadable query string or an oversized body still gets the ack.
pub async fn mpesa_webhook(
    State(state): State<AppState>,
    params: Result<Query<WebhookParams>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> CallbackAck {
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "Unreadable callback body");
            return state.callbacks.reject("", "unreadable callback body");
        }
    };
    let body = String::from_utf8_lossy(&body);

    match params {
        Ok(Query(params)) => state.callbacks.receive(&body, params.token.as_deref()),
        Err(e) => {
            tracing::warn!(error = %e, "Unreadable callback query string; not processed");
            state.callbacks.reject(&body, "callback token mismatch")
        }
    }
}
