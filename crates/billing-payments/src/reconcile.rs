//! Reconciliation
//!
//! The single path every gateway result takes, whether it arrived on the
//! webhook or from a status poll. Exactly one delivery per checkout request
//! performs the terminal transition; every later one is absorbed.

use std::sync::Arc;

use chrono::Utc;

use billing_core::{
    error::Result,
    gateway::GatewayResult,
    intent::PaymentIntent,
    subscription::PeriodExtension,
};

use crate::backlog::{ReconcileSource, ReconciliationBacklog};
use crate::events::{EventPublisher, PaymentEvent};
use crate::store::{BillingStore, ResolveOutcome};

/// What a delivery did
#[derive(Clone, Debug)]
pub enum Reconciliation {
    /// First terminal transition for this intent
    Applied {
        intent: PaymentIntent,
        extension: Option<PeriodExtension>,
        /// Amount the gateway reported when it differs from the request
        amount_mismatch: Option<u64>,
    },
    /// Intent was already terminal
    Duplicate(PaymentIntent),
    /// No intent carries this checkout request id
    Unknown { checkout_request_id: String },
}

impl Reconciliation {
    pub fn intent(&self) -> Option<&PaymentIntent> {
        match self {
            Reconciliation::Applied { intent, .. } | Reconciliation::Duplicate(intent) => {
                Some(intent)
            }
            Reconciliation::Unknown { .. } => None,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Reconciliation::Applied { .. })
    }
}

/// Applies gateway results to intents and the ledger
pub struct Reconciler<S: BillingStore> {
    store: Arc<S>,
    events: EventPublisher,
    backlog: Arc<ReconciliationBacklog>,
}

impl<S: BillingStore> Reconciler<S> {
    pub fn new(
        store: Arc<S>,
        events: EventPublisher,
        backlog: Arc<ReconciliationBacklog>,
    ) -> Self {
        Self { store, events, backlog }
    }

    /// Apply one gateway result
    ///
    /// Persistence failures are queued for manual follow-up and returned.
    pub fn reconcile(
        &self,
        result: &GatewayResult,
        source: ReconcileSource,
    ) -> Result<Reconciliation> {
        let checkout = result.checkout_request_id.as_str();
        let resolution = result.resolution();

        let outcome = match self.store.resolve(checkout, &resolution, Utc::now()) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    checkout_request_id = %checkout,
                    source = source.as_str(),
                    error = %e,
                    "Failed to apply gateway result"
                );
                self.backlog.record(
                    Some(checkout),
                    source,
                    format!("persistence failure: {e}"),
                    serde_json::to_string(result).ok(),
                );
                return Err(e);
            }
        };

        match outcome {
            ResolveOutcome::Unknown => {
                tracing::warn!(
                    checkout_request_id = %checkout,
                    source = source.as_str(),
                    result_code = result.result_code,
                    "Gateway result for unknown checkout request; ignoring"
                );
                Ok(Reconciliation::Unknown {
                    checkout_request_id: checkout.to_string(),
                })
            }

            ResolveOutcome::AlreadyTerminal { intent, enriched } => {
                if enriched {
                    tracing::info!(
                        intent_id = %intent.id,
                        checkout_request_id = %checkout,
                        source = source.as_str(),
                        receipt = ?intent.gateway_receipt_number,
                        "Late delivery filled missing payment details"
                    );
                } else {
                    tracing::debug!(
                        checkout_request_id = %checkout,
                        source = source.as_str(),
                        status = %intent.status,
                        "Duplicate delivery absorbed"
                    );
                }
                Ok(Reconciliation::Duplicate(intent))
            }

            ResolveOutcome::Applied { intent, extension, ledger_missing } => {
                let amount_mismatch = result
                    .metadata
                    .amount
                    .filter(|reported| result.is_success() && *reported != intent.amount_requested);
                if let Some(reported) = amount_mismatch {
                    tracing::warn!(
                        checkout_request_id = %checkout,
                        requested = intent.amount_requested,
                        reported,
                        "Gateway reported a different amount than requested"
                    );
                }

                if ledger_missing {
                    self.backlog.record(
                        Some(checkout),
                        source,
                        format!(
                            "subscription payment completed but business {} has no account",
                            intent.business_id
                        ),
                        serde_json::to_string(result).ok(),
                    );
                }

                tracing::info!(
                    intent_id = %intent.id,
                    checkout_request_id = %checkout,
                    business_id = %intent.business_id,
                    status = %intent.status,
                    source = source.as_str(),
                    receipt = ?intent.gateway_receipt_number,
                    period_ends_at = ?extension.as_ref().map(|e| e.new_end),
                    "Payment reconciled"
                );

                if let Some(event) = PaymentEvent::for_intent(&intent, extension.as_ref()) {
                    self.events.publish(event);
                }

                Ok(Reconciliation::Applied { intent, extension, amount_mismatch })
            }
        }
    }
}
