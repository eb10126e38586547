//! Shared test fixtures

use std::sync::Arc;

use billing_core::{
    gateway::PushAccepted,
    intent::{PaymentIntent, PaymentPurpose, Resolution},
    phone::PhoneNumber,
};
use billing_gateway::MockGateway;

use crate::backlog::ReconciliationBacklog;
use crate::callback::CallbackReceiver;
use crate::events::{EventPublisher, PaymentEvent};
use crate::initiator::PushInitiator;
use crate::ledger::SubscriptionLedger;
use crate::poller::{PollPolicy, StatusPoller};
use crate::reconcile::Reconciler;
use crate::store::MemoryBillingStore;

/// A PENDING 2000-unit subscription intent with the given checkout id
pub fn pending_intent(business_id: &str, checkout_request_id: &str) -> PaymentIntent {
    let mut intent = PaymentIntent::initiate(
        business_id,
        "user-1",
        2000,
        PhoneNumber::parse("0712345678").unwrap(),
        PaymentPurpose::Subscription,
    )
    .unwrap();
    intent
        .mark_pending(&PushAccepted {
            merchant_request_id: format!("merchant-{checkout_request_id}"),
            checkout_request_id: checkout_request_id.to_string(),
            customer_message: None,
        })
        .unwrap();
    intent
}

pub fn success(receipt: &str) -> Resolution {
    Resolution::Completed {
        receipt_number: Some(receipt.to_string()),
        transaction_time: None,
        amount: Some(2000),
    }
}

/// Every service wired over one store, one mock gateway and one event channel
pub struct Harness {
    pub store: Arc<MemoryBillingStore>,
    pub gateway: Arc<MockGateway>,
    pub backlog: Arc<ReconciliationBacklog>,
    pub events: tokio::sync::mpsc::UnboundedReceiver<PaymentEvent>,
    pub ledger: SubscriptionLedger<MemoryBillingStore>,
    pub reconciler: Arc<Reconciler<MemoryBillingStore>>,
    pub initiator: PushInitiator<MemoryBillingStore>,
    pub callbacks: CallbackReceiver<MemoryBillingStore>,
    pub poller: StatusPoller<MemoryBillingStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_callback_token(None)
    }

    pub fn with_callback_token(token: Option<&str>) -> Self {
        let store = Arc::new(MemoryBillingStore::new());
        let gateway = Arc::new(MockGateway::new());
        let backlog = Arc::new(ReconciliationBacklog::new());
        let (publisher, events) = EventPublisher::channel();

        let reconciler = Arc::new(Reconciler::new(store.clone(), publisher, backlog.clone()));

        Self {
            ledger: SubscriptionLedger::new(store.clone()),
            initiator: PushInitiator::new(gateway.clone(), store.clone(), backlog.clone()),
            callbacks: CallbackReceiver::new(
                reconciler.clone(),
                backlog.clone(),
                token.map(str::to_string),
            ),
            poller: StatusPoller::new(
                gateway.clone(),
                store.clone(),
                reconciler.clone(),
                PollPolicy::default(),
            ),
            store,
            gateway,
            backlog,
            events,
            reconciler,
        }
    }

    /// Drain events published so far
    pub fn drain_events(&mut self) -> Vec<PaymentEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

/// A gateway callback body as the provider sends it
pub fn callback_body(checkout_request_id: &str, result_code: i64, receipt: Option<&str>) -> String {
    let metadata = receipt.map(|receipt| {
        serde_json::json!({
            "Item": [
                { "Name": "Amount", "Value": 2000.0 },
                { "Name": "MpesaReceiptNumber", "Value": receipt },
                { "Name": "Balance" },
                { "Name": "TransactionDate", "Value": 20191219102115_u64 },
                { "Name": "PhoneNumber", "Value": 254712345678_u64 }
            ]
        })
    });

    let mut callback = serde_json::json!({
        "MerchantRequestID": "29115-34620561-1",
        "CheckoutRequestID": checkout_request_id,
        "ResultCode": result_code,
        "ResultDesc": if result_code == 0 {
            "The service request is processed successfully."
        } else {
            "Request cancelled by user"
        },
    });
    if let Some(metadata) = metadata {
        callback["CallbackMetadata"] = metadata;
    }

    serde_json::json!({ "Body": { "stkCallback": callback } }).to_string()
}
