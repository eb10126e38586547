//! Mock Gateway
//!
//! For testing and local demos. Accepts every push unless told to fail and
//! answers status queries from a script keyed by checkout request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use billing_core::{
    error::{BillingError, Result},
    gateway::{
        GatewayResult, PaymentGateway, PaymentMetadata, PushAccepted, PushRequest, StatusQuery,
    },
};

/// Failure the mock should produce on push
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockFailure {
    /// Token acquisition fails
    Credential,
    /// Gateway rejects the push
    Rejection,
    /// Transport error
    Network,
}

impl MockFailure {
    fn to_error(self) -> BillingError {
        match self {
            MockFailure::Credential => {
                BillingError::Credential("mock: invalid consumer key".into())
            }
            MockFailure::Rejection => BillingError::GatewayRejection {
                status: Some(400),
                payload: r#"{"errorCode":"400.002.02","errorMessage":"Bad Request"}"#.into(),
            },
            MockFailure::Network => BillingError::Network("mock: connection reset".into()),
        }
    }
}

/// Scriptable in-process gateway
#[derive(Default)]
pub struct MockGateway {
    push_failure: Mutex<Option<MockFailure>>,
    query_failure: Mutex<Option<MockFailure>>,
    statuses: Mutex<HashMap<String, StatusQuery>>,
    pushes: Mutex<Vec<PushRequest>>,
    push_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent push fail
    pub async fn fail_pushes(&self, failure: MockFailure) {
        *self.push_failure.lock().await = Some(failure);
    }

    /// Make every subsequent status query fail
    pub async fn fail_queries(&self, failure: Option<MockFailure>) {
        *self.query_failure.lock().await = failure;
    }

    /// Script the answer for a checkout request
    pub async fn set_status(&self, checkout_request_id: &str, status: StatusQuery) {
        self.statuses
            .lock()
            .await
            .insert(checkout_request_id.to_string(), status);
    }

    /// Script a terminal result for a checkout request
    pub async fn resolve(
        &self,
        checkout_request_id: &str,
        result_code: i64,
        receipt: Option<&str>,
    ) {
        let result = GatewayResult {
            merchant_request_id: None,
            checkout_request_id: checkout_request_id.to_string(),
            result_code,
            result_desc: if result_code == 0 {
                "The service request is processed successfully.".into()
            } else {
                String::new()
            },
            metadata: PaymentMetadata {
                receipt_number: receipt.map(str::to_string),
                ..Default::default()
            },
        };
        self.set_status(checkout_request_id, StatusQuery::Resolved(result))
            .await;
    }

    /// Requests accepted so far
    pub async fn pushes(&self) -> Vec<PushRequest> {
        self.pushes.lock().await.clone()
    }

    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn acquire_token(&self) -> Result<String> {
        Ok("mock-token".into())
    }

    async fn push(&self, request: &PushRequest) -> Result<PushAccepted> {
        let n = self.push_calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(failure) = *self.push_failure.lock().await {
            return Err(failure.to_error());
        }

        self.pushes.lock().await.push(request.clone());

        Ok(PushAccepted {
            merchant_request_id: format!("mock-merchant-{n}"),
            checkout_request_id: format!("ws_CO_mock_{n}"),
            customer_message: Some("Success. Request accepted for processing".into()),
        })
    }

    async fn query_status(&self, checkout_request_id: &str) -> Result<StatusQuery> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(failure) = *self.query_failure.lock().await {
            return Err(failure.to_error());
        }

        Ok(self
            .statuses
            .lock()
            .await
            .get(checkout_request_id)
            .cloned()
            .unwrap_or(StatusQuery::Processing))
    }

    fn name(&self) -> &str {
        "MockGateway"
    }
}
