//! Callback Receiver
//!
//! Parses the gateway's webhook payload and feeds it to the reconciler. The
//! gateway retries anything it does not see acknowledged, so every delivery
//! is acknowledged: unknown ids, duplicates, malformed bodies and internal
//! failures alike. Failures that need a human land in the backlog.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use billing_core::{
    error::{BillingError, Result},
    gateway::{lenient_i64, CallbackMetadata, GatewayResult},
};

use crate::backlog::{ReconcileSource, ReconciliationBacklog};
use crate::reconcile::Reconciler;
use crate::store::BillingStore;

/// `{"Body": {"stkCallback": {...}}}`
#[derive(Debug, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,

    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,

    /// Number or numeric string depending on the gateway build
    #[serde(rename = "ResultCode")]
    pub result_code: Value,

    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,

    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

/// Parse a raw webhook body into a gateway result
pub fn parse_callback(body: &str) -> Result<GatewayResult> {
    let envelope: StkCallbackEnvelope =
        serde_json::from_str(body).map_err(|e| BillingError::MalformedResponse {
            payload: format!("{e}: {body}"),
        })?;
    let callback = envelope.body.stk_callback;

    let result_code =
        lenient_i64(&callback.result_code).ok_or_else(|| BillingError::MalformedResponse {
            payload: format!("unreadable ResultCode: {body}"),
        })?;

    if callback.checkout_request_id.trim().is_empty() {
        return Err(BillingError::MalformedResponse {
            payload: format!("empty CheckoutRequestID: {body}"),
        });
    }

    Ok(GatewayResult {
        merchant_request_id: callback.merchant_request_id,
        checkout_request_id: callback.checkout_request_id.trim().to_string(),
        result_code,
        result_desc: callback.result_desc.unwrap_or_default(),
        metadata: callback
            .callback_metadata
            .map(|m| m.to_metadata())
            .unwrap_or_default(),
    })
}

/// Body the gateway expects back
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,

    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    pub fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted".into(),
        }
    }
}

#[cfg(feature = "axum-handlers")]
impl axum::response::IntoResponse for CallbackAck {
    fn into_response(self) -> axum::response::Response {
        (axum::http::StatusCode::OK, axum::Json(self)).into_response()
    }
}

/// Webhook entry point
pub struct CallbackReceiver<S: BillingStore> {
    reconciler: Arc<Reconciler<S>>,
    backlog: Arc<ReconciliationBacklog>,

    /// Shared token expected as `?token=` on the callback URL
    token: Option<String>,
}

impl<S: BillingStore> CallbackReceiver<S> {
    pub fn new(
        reconciler: Arc<Reconciler<S>>,
        backlog: Arc<ReconciliationBacklog>,
        token: Option<String>,
    ) -> Self {
        Self { reconciler, backlog, token }
    }

    /// Handle one delivery. Always acknowledges.
    pub fn receive(&self, body: &str, token: Option<&str>) -> CallbackAck {
        if let Some(expected) = &self.token {
            if token != Some(expected.as_str()) {
                tracing::warn!("Callback with missing or wrong token; not processed");
                return self.reject(body, "callback token mismatch");
            }
        }

        let result = match parse_callback(body) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed gateway callback");
                return self.reject(body, "malformed callback payload");
            }
        };

        tracing::debug!(
            checkout_request_id = %result.checkout_request_id,
            result_code = result.result_code,
            "Gateway callback received"
        );

        if let Err(e) = self.reconciler.reconcile(&result, ReconcileSource::Callback) {
            // Already queued by the reconciler; the gateway still gets its ack.
            tracing::error!(
                checkout_request_id = %result.checkout_request_id,
                error = %e,
                "Callback could not be applied"
            );
        }

        CallbackAck::accepted()
    }

    /// Acknowledge a delivery without processing it; the body goes to the backlog
    pub fn reject(&self, body: &str, reason: &str) -> CallbackAck {
        self.backlog
            .record(None, ReconcileSource::Callback, reason, Some(body.to_string()));
        CallbackAck::accepted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{callback_body, pending_intent, Harness};
    use billing_core::{
        gateway::PaymentMetadata, intent::IntentStatus, subscription::SubscriptionStatus,
    };
    use chrono::{Duration, Timelike, Utc};

    #[test]
    fn test_parse_success_callback() {
        let result = parse_callback(&callback_body("ws_CO_1", 0, Some("ABC123XYZ"))).unwrap();

        assert!(result.is_success());
        assert_eq!(result.merchant_request_id.as_deref(), Some("29115-34620561-1"));
        assert_eq!(result.metadata.amount, Some(2000));
        assert_eq!(result.metadata.receipt_number.as_deref(), Some("ABC123XYZ"));
        assert_eq!(result.metadata.phone.as_deref(), Some("254712345678"));
        assert_eq!(result.metadata.transaction_time.unwrap().hour(), 7);
    }

    #[test]
    fn test_parse_tolerates_reordered_and_string_values() {
        let body = serde_json::json!({
            "Body": { "stkCallback": {
                "CheckoutRequestID": "ws_CO_2",
                "ResultCode": "0",
                "ResultDesc": "ok",
                "CallbackMetadata": { "Item": [
                    { "Name": "PhoneNumber", "Value": "254712345678" },
                    { "Name": "MpesaReceiptNumber", "Value": "QWE" },
                    { "Name": "Amount", "Value": "150" }
                ]}
            }}
        })
        .to_string();

        let result = parse_callback(&body).unwrap();
        assert_eq!(result.result_code, 0);
        assert_eq!(result.metadata.amount, Some(150));
        assert_eq!(result.metadata.receipt_number.as_deref(), Some("QWE"));
        assert!(result.metadata.transaction_time.is_none());
        assert!(result.merchant_request_id.is_none());
    }

    #[test]
    fn test_parse_failure_callback_without_metadata() {
        let result = parse_callback(&callback_body("ws_CO_3", 1032, None)).unwrap();
        assert_eq!(result.result_code, 1032);
        assert_eq!(result.metadata, PaymentMetadata::default());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_callback("<html>"), Err(BillingError::MalformedResponse { .. })));
        let null_code = r#"{"Body":{"stkCallback":{"CheckoutRequestID":"x","ResultCode":null}}}"#;
        assert!(parse_callback(null_code).is_err());
    }

    #[test]
    fn test_ack_shape() {
        let json = serde_json::to_value(CallbackAck::accepted()).unwrap();
        assert_eq!(json, serde_json::json!({ "ResultCode": 0, "ResultDesc": "Accepted" }));
    }

    #[test]
    fn test_receive_applies_and_acks() {
        let h = Harness::new();
        h.ledger
            .open_account("biz-1", SubscriptionStatus::Trial, Utc::now() + Duration::days(2))
            .unwrap();
        h.store.insert_intent(&pending_intent("biz-1", "ws_CO_1")).unwrap();

        let ack = h.callbacks.receive(&callback_body("ws_CO_1", 0, Some("ABC123XYZ")), None);

        assert_eq!(ack, CallbackAck::accepted());
        let intent = h.store.get_by_checkout("ws_CO_1").unwrap().unwrap();
        assert_eq!(intent.status, IntentStatus::Completed);
        assert_eq!(intent.gateway_receipt_number.as_deref(), Some("ABC123XYZ"));
    }

    #[test]
    fn test_malformed_body_is_acked_and_backlogged() {
        let h = Harness::new();
        let ack = h.callbacks.receive("not json", None);

        assert_eq!(ack, CallbackAck::accepted());
        assert_eq!(h.backlog.len(), 1);
        assert_eq!(h.backlog.list()[0].payload.as_deref(), Some("not json"));
    }

    #[test]
    fn test_reject_acks_without_processing() {
        let h = Harness::new();
        h.store.insert_intent(&pending_intent("biz-1", "ws_CO_1")).unwrap();

        let body = callback_body("ws_CO_1", 0, Some("R1"));
        let ack = h.callbacks.reject(&body, "unreadable callback query");

        assert_eq!(ack, CallbackAck::accepted());
        let intent = h.store.get_by_checkout("ws_CO_1").unwrap().unwrap();
        assert_eq!(intent.status, IntentStatus::Pending);
        assert_eq!(h.backlog.list()[0].reason, "unreadable callback query");
    }

    #[test]
    fn test_token_mismatch_is_not_processed() {
        let h = Harness::with_callback_token(Some("s3cret"));
        h.store.insert_intent(&pending_intent("biz-1", "ws_CO_1")).unwrap();
        let body = callback_body("ws_CO_1", 0, Some("R1"));

        assert_eq!(h.callbacks.receive(&body, Some("wrong")), CallbackAck::accepted());
        assert_eq!(h.callbacks.receive(&body, None), CallbackAck::accepted());
        let status = || h.store.get_by_checkout("ws_CO_1").unwrap().unwrap().status;
        assert_eq!(status(), IntentStatus::Pending);
        assert_eq!(h.backlog.len(), 2);

        h.callbacks.receive(&body, Some("s3cret"));
        assert_eq!(status(), IntentStatus::Completed);
    }
}
