//! Payment events and notification dispatch
//!
//! Reconciliation publishes onto an unbounded channel and moves on. A separate
//! dispatcher task hands events to a [`NotificationSink`]; sink failures are
//! logged and never reach the reconciliation path.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use billing_core::{
    error::Result,
    intent::{IntentStatus, PaymentIntent},
    subscription::PeriodExtension,
};

/// Event emitted after a first terminal transition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    PaymentCompleted {
        intent_id: String,
        business_id: String,
        checkout_request_id: String,
        amount: u64,
        payer_phone: String,
        receipt_number: Option<String>,
        transaction_time: Option<DateTime<Utc>>,
        /// New period end when the payment extended a subscription
        period_ends_at: Option<DateTime<Utc>>,
    },
    PaymentFailed {
        intent_id: String,
        business_id: String,
        checkout_request_id: String,
        payer_phone: String,
        result_code: Option<i64>,
        reason: Option<String>,
    },
}

impl PaymentEvent {
    /// Build the event for a terminal intent; `None` for non-terminal intents
    pub fn for_intent(intent: &PaymentIntent, extension: Option<&PeriodExtension>) -> Option<Self> {
        match intent.status {
            IntentStatus::Completed => Some(PaymentEvent::PaymentCompleted {
                intent_id: intent.id.to_string(),
                business_id: intent.business_id.clone(),
                checkout_request_id: intent.checkout_key().to_string(),
                amount: intent.amount_requested,
                payer_phone: intent.payer_phone.to_string(),
                receipt_number: intent.gateway_receipt_number.clone(),
                transaction_time: intent.gateway_transaction_time,
                period_ends_at: extension.map(|e| e.new_end),
            }),
            IntentStatus::Failed => Some(PaymentEvent::PaymentFailed {
                intent_id: intent.id.to_string(),
                business_id: intent.business_id.clone(),
                checkout_request_id: intent.checkout_key().to_string(),
                payer_phone: intent.payer_phone.to_string(),
                result_code: intent.failure_code,
                reason: intent.failure_reason.clone(),
            }),
            IntentStatus::Initiated | IntentStatus::Pending => None,
        }
    }

    pub fn intent_id(&self) -> &str {
        match self {
            PaymentEvent::PaymentCompleted { intent_id, .. }
            | PaymentEvent::PaymentFailed { intent_id, .. } => intent_id,
        }
    }
}

/// Sending half of the event channel
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<PaymentEvent>,
}

impl EventPublisher {
    /// Create a publisher and the receiver a dispatcher should consume
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PaymentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire and forget
    pub fn publish(&self, event: PaymentEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::warn!(
                intent_id = %e.0.intent_id(),
                "No notification dispatcher running; event dropped"
            );
        }
    }
}

/// Delivery target for payment events (SMS, email, ...)
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, event: &PaymentEvent) -> Result<()>;

    fn name(&self) -> &str;
}

/// Sink that only writes events to the log
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn deliver(&self, event: &PaymentEvent) -> Result<()> {
        match event {
            PaymentEvent::PaymentCompleted { business_id, receipt_number, amount, .. } => {
                tracing::info!(
                    business_id = %business_id,
                    receipt = ?receipt_number,
                    amount = amount,
                    "Payment completed notification"
                );
            }
            PaymentEvent::PaymentFailed { business_id, reason, .. } => {
                tracing::info!(
                    business_id = %business_id,
                    reason = ?reason,
                    "Payment failed notification"
                );
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Consumes published events and hands them to a sink
pub struct NotificationDispatcher;

impl NotificationDispatcher {
    /// Run until every publisher is dropped
    pub fn spawn(
        mut rx: mpsc::UnboundedReceiver<PaymentEvent>,
        sink: Arc<dyn NotificationSink>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.deliver(&event).await {
                    tracing::error!(
                        sink = sink.name(),
                        intent_id = %event.intent_id(),
                        error = %e,
                        "Notification delivery failed"
                    );
                }
            }
            tracing::debug!(sink = sink.name(), "Notification dispatcher stopped");
        })
    }
}
