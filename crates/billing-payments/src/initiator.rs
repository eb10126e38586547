//! Push Initiator
//!
//! Validates a payment request, sends the push to the payer's handset and
//! records the PENDING intent. Nothing is stored unless the gateway accepted
//! the push.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use billing_core::{
    error::Result,
    gateway::{PaymentGateway, PushRequest},
    intent::{PaymentIntent, PaymentPurpose},
    phone::PhoneNumber,
};

use crate::backlog::{ReconcileSource, ReconciliationBacklog};
use crate::store::BillingStore;

/// Request to start a payment
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitiatePayment {
    pub business_id: String,

    pub user_id: String,

    /// Payer phone in any common local or international format
    pub phone: String,

    /// Whole currency units
    pub amount: u64,

    #[serde(default)]
    pub purpose: PaymentPurpose,
}

/// A push the gateway accepted
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitiatedPayment {
    pub intent: PaymentIntent,

    /// Text the gateway suggests showing the user
    pub customer_message: Option<String>,
}

/// Push initiator
pub struct PushInitiator<S: BillingStore> {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<S>,
    backlog: Arc<ReconciliationBacklog>,
}

impl<S: BillingStore> PushInitiator<S> {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<S>,
        backlog: Arc<ReconciliationBacklog>,
    ) -> Self {
        Self { gateway, store, backlog }
    }

    /// Push a payment request; returns the PENDING intent
    pub async fn initiate(&self, request: InitiatePayment) -> Result<InitiatedPayment> {
        let phone = PhoneNumber::parse(&request.phone)?;
        let mut intent = PaymentIntent::initiate(
            request.business_id,
            request.user_id,
            request.amount,
            phone,
            request.purpose,
        )?;

        let push = PushRequest {
            phone: intent.payer_phone.clone(),
            amount: intent.amount_requested,
            reference: intent.business_id.clone(),
            description: intent.purpose.description().to_string(),
        };

        let accepted = match self.gateway.push(&push).await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(
                    gateway = self.gateway.name(),
                    business_id = %intent.business_id,
                    phone = %intent.payer_phone.masked(),
                    error = %e,
                    "Push rejected; no intent recorded"
                );
                return Err(e);
            }
        };

        intent.mark_pending(&accepted)?;

        if let Err(e) = self.store.insert_intent(&intent) {
            // The handset already has the prompt, so the result will arrive.
            self.backlog.record(
                Some(&accepted.checkout_request_id),
                ReconcileSource::Push,
                format!("push accepted but intent not stored: {e}"),
                serde_json::to_string(&intent).ok(),
            );
            return Err(e);
        }

        tracing::info!(
            intent_id = %intent.id,
            business_id = %intent.business_id,
            checkout_request_id = %accepted.checkout_request_id,
            amount = intent.amount_requested,
            purpose = intent.purpose.as_str(),
            phone = %intent.payer_phone.masked(),
            "Push accepted; payment pending"
        );

        Ok(InitiatedPayment {
            intent,
            customer_message: accepted.customer_message,
        })
    }
}
