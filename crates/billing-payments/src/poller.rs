//! Status Poller
//!
//! Client-driven fallback for when the webhook is slow or never arrives. A
//! poll on a terminal intent is a pure read; a poll on a PENDING intent asks
//! the gateway and feeds any terminal answer through the same reconciler the
//! webhook uses.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use billing_core::{
    error::{BillingError, Result},
    gateway::{PaymentGateway, StatusQuery},
    intent::{IntentId, IntentStatus, PaymentIntent},
};

use crate::backlog::ReconcileSource;
use crate::reconcile::Reconciler;
use crate::store::BillingStore;

/// How often and how long a client should poll
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval_secs: u64,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            max_attempts: 12,
        }
    }
}

impl PollPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Client-facing payment state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    /// Keep polling
    Processing,
    /// Attempts exhausted; the payment may still resolve later
    StillProcessing,
    Completed,
    Failed,
}

impl PaymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentState::Completed | PaymentState::Failed)
    }
}

/// What a poll returns to the UI
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentStatusView {
    pub intent_id: String,
    pub checkout_request_id: String,
    pub state: PaymentState,
    pub status: IntentStatus,
    pub amount: u64,
    pub receipt_number: Option<String>,
    pub failure_reason: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub attempt: u32,

    /// Present while the client should keep polling
    pub poll: Option<PollPolicy>,
}

impl PaymentStatusView {
    fn build(intent: &PaymentIntent, attempt: u32, policy: PollPolicy) -> Self {
        let state = match intent.status {
            IntentStatus::Completed => PaymentState::Completed,
            IntentStatus::Failed => PaymentState::Failed,
            IntentStatus::Initiated | IntentStatus::Pending if attempt >= policy.max_attempts => {
                PaymentState::StillProcessing
            }
            IntentStatus::Initiated | IntentStatus::Pending => PaymentState::Processing,
        };

        Self {
            intent_id: intent.id.to_string(),
            checkout_request_id: intent.checkout_key().to_string(),
            state,
            status: intent.status,
            amount: intent.amount_requested,
            receipt_number: intent.gateway_receipt_number.clone(),
            failure_reason: intent.failure_reason.clone(),
            resolved_at: intent.resolved_at,
            attempt,
            poll: (state == PaymentState::Processing).then_some(policy),
        }
    }
}

/// Status poller
pub struct StatusPoller<S: BillingStore> {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<S>,
    reconciler: Arc<Reconciler<S>>,
    policy: PollPolicy,
}

impl<S: BillingStore> StatusPoller<S> {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<S>,
        reconciler: Arc<Reconciler<S>>,
        policy: PollPolicy,
    ) -> Self {
        Self { gateway, store, reconciler, policy }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// One poll; `attempt` counts from 1
    pub async fn check_status(
        &self,
        intent_id: &IntentId,
        attempt: u32,
    ) -> Result<PaymentStatusView> {
        let intent = self
            .store
            .get_intent(intent_id)?
            .ok_or_else(|| BillingError::UnknownIntent(intent_id.to_string()))?;

        if intent.is_terminal() || attempt > self.policy.max_attempts {
            return Ok(PaymentStatusView::build(&intent, attempt, self.policy));
        }

        let checkout = intent.checkout_key().to_string();
        let result = match self.gateway.query_status(&checkout).await {
            Ok(StatusQuery::Resolved(result)) => result,
            Ok(StatusQuery::Processing) => {
                tracing::debug!(
                    checkout_request_id = %checkout,
                    attempt,
                    "Payment still processing"
                );
                return Ok(PaymentStatusView::build(&intent, attempt, self.policy));
            }
            Err(e) => {
                tracing::warn!(
                    gateway = self.gateway.name(),
                    checkout_request_id = %checkout,
                    attempt,
                    error = %e,
                    "Status query failed; reporting as processing"
                );
                return Ok(PaymentStatusView::build(&intent, attempt, self.policy));
            }
        };

        let reconciled = self.reconciler.reconcile(&result, ReconcileSource::Poll)?;
        let current = match reconciled.intent() {
            Some(current) => current.clone(),
            None => intent,
        };

        Ok(PaymentStatusView::build(&current, attempt, self.policy))
    }

    /// Poll on the policy's schedule until terminal or out of attempts
    pub async fn await_resolution(&self, intent_id: &IntentId) -> Result<PaymentStatusView> {
        let mut attempt = 1;
        loop {
            let view = self.check_status(intent_id, attempt).await?;
            if view.state != PaymentState::Processing {
                return Ok(view);
            }
            tokio::time::sleep(self.policy.interval()).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initiator::InitiatePayment;
    use crate::testing::{callback_body, Harness};
    use billing_core::intent::PaymentPurpose;
    use billing_gateway::MockFailure;

    async fn initiate(h: &Harness) -> PaymentIntent {
        h.initiator
            .initiate(InitiatePayment {
                business_id: "biz-1".into(),
                user_id: "user-1".into(),
                phone: "0712345678".into(),
                amount: 2000,
                purpose: PaymentPurpose::Subscription,
            })
            .await
            .unwrap()
            .intent
    }

    #[tokio::test]
    async fn test_pending_poll_reports_processing() {
        let h = Harness::new();
        let intent = initiate(&h).await;

        let view = h.poller.check_status(&intent.id, 1).await.unwrap();

        assert_eq!(view.state, PaymentState::Processing);
        assert_eq!(view.poll, Some(PollPolicy::default()));
        assert_eq!(h.gateway.query_calls(), 1);
    }

    #[tokio::test]
    async fn test_poll_resolves_through_reconciler() {
        let mut h = Harness::new();
        let intent = initiate(&h).await;
        h.gateway.resolve(intent.checkout_key(), 0, Some("ABC123XYZ")).await;

        let view = h.poller.check_status(&intent.id, 2).await.unwrap();

        assert_eq!(view.state, PaymentState::Completed);
        assert_eq!(view.receipt_number.as_deref(), Some("ABC123XYZ"));
        assert!(view.poll.is_none());
        assert_eq!(h.drain_events().len(), 1);
    }

    #[tokio::test]
    async fn test_query_failure_reports_processing() {
        let h = Harness::new();
        let intent = initiate(&h).await;
        h.gateway.fail_queries(Some(MockFailure::Network)).await;

        let view = h.poller.check_status(&intent.id, 1).await.unwrap();
        assert_eq!(view.state, PaymentState::Processing);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_report_still_processing() {
        let h = Harness::new();
        let intent = initiate(&h).await;
        let max = PollPolicy::default().max_attempts;

        let at_ceiling = h.poller.check_status(&intent.id, max).await.unwrap();
        assert_eq!(at_ceiling.state, PaymentState::StillProcessing);
        assert_eq!(h.gateway.query_calls(), 1);

        let beyond = h.poller.check_status(&intent.id, max + 1).await.unwrap();
        assert_eq!(beyond.state, PaymentState::StillProcessing);
        assert_eq!(h.gateway.query_calls(), 1);
    }

    #[tokio::test]
    async fn test_terminal_poll_skips_gateway() {
        let h = Harness::new();
        let intent = initiate(&h).await;
        h.callbacks.receive(&callback_body(intent.checkout_key(), 1032, None), None);

        let view = h.poller.check_status(&intent.id, 1).await.unwrap();

        assert_eq!(view.state, PaymentState::Failed);
        assert_eq!(view.failure_reason.as_deref(), Some("Request cancelled by user"));
        assert_eq!(h.gateway.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_intent() {
        let h = Harness::new();
        let err = h.poller.check_status(&IntentId::new(), 1).await.unwrap_err();
        assert!(matches!(err, BillingError::UnknownIntent(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_resolution_stops_at_ceiling() {
        let h = Harness::new();
        let intent = initiate(&h).await;

        let view = h.poller.await_resolution(&intent.id).await.unwrap();

        assert_eq!(view.state, PaymentState::StillProcessing);
        assert_eq!(view.attempt, PollPolicy::default().max_attempts);
        assert_eq!(h.gateway.query_calls(), 12);
    }
}
