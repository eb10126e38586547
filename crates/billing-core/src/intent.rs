//! Payment Intents
//!
//! One intent per payment attempt, keyed for reconciliation by the gateway's
//! checkout request id.
//!
//! ```text
//!   INITIATED ──push ok──▶ PENDING ──result 0──▶ COMPLETED
//!       │                     │
//!   push failed           result ≠ 0
//!       ▼                     ▼
//!   (discarded)             FAILED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BillingError, Result};
use crate::gateway::PushAccepted;
use crate::phone::PhoneNumber;

/// Locally generated intent identifier (the client's correlation id)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntentId(String);

impl IntentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for IntentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IntentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Intent lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    Initiated,
    Pending,
    Completed,
    Failed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Initiated => "INITIATED",
            IntentStatus::Pending => "PENDING",
            IntentStatus::Completed => "COMPLETED",
            IntentStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentStatus::Completed | IntentStatus::Failed)
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a successful payment is for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPurpose {
    /// Extends the business's subscription period on success
    #[default]
    Subscription,
    /// Recorded only; no ledger side effect
    General,
}

impl PaymentPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPurpose::Subscription => "subscription",
            PaymentPurpose::General => "general",
        }
    }

    /// Short gateway-facing description (max 13 chars on the wire)
    pub fn description(&self) -> &'static str {
        match self {
            PaymentPurpose::Subscription => "Subscription",
            PaymentPurpose::General => "Payment",
        }
    }
}

/// Terminal result reported by the gateway for one checkout request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Completed {
        receipt_number: Option<String>,
        transaction_time: Option<DateTime<Utc>>,
        amount: Option<u64>,
    },
    Failed {
        result_code: i64,
        reason: String,
    },
}

impl Resolution {
    pub fn is_success(&self) -> bool {
        matches!(self, Resolution::Completed { .. })
    }

    pub fn status(&self) -> IntentStatus {
        match self {
            Resolution::Completed { .. } => IntentStatus::Completed,
            Resolution::Failed { .. } => IntentStatus::Failed,
        }
    }
}

/// Durable record of one payment attempt
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: IntentId,
    pub business_id: String,
    pub initiating_user_id: String,
    pub amount_requested: u64,
    pub payer_phone: PhoneNumber,
    pub purpose: PaymentPurpose,
    pub status: IntentStatus,

    /// Gateway id for the push operation
    pub merchant_request_id: Option<String>,

    /// Gateway id for the payment attempt (reconciliation key)
    pub checkout_request_id: Option<String>,

    pub gateway_receipt_number: Option<String>,
    pub gateway_transaction_time: Option<DateTime<Utc>>,

    pub failure_code: Option<i64>,
    pub failure_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PaymentIntent {
    /// Create an INITIATED intent; it is not persisted until the push succeeds
    pub fn initiate(
        business_id: impl Into<String>,
        initiating_user_id: impl Into<String>,
        amount_requested: u64,
        payer_phone: PhoneNumber,
        purpose: PaymentPurpose,
    ) -> Result<Self> {
        if amount_requested == 0 {
            return Err(BillingError::InvalidAmount("amount must be at least 1".into()));
        }

        Ok(Self {
            id: IntentId::new(),
            business_id: business_id.into(),
            initiating_user_id: initiating_user_id.into(),
            amount_requested,
            payer_phone,
            purpose,
            status: IntentStatus::Initiated,
            merchant_request_id: None,
            checkout_request_id: None,
            gateway_receipt_number: None,
            gateway_transaction_time: None,
            failure_code: None,
            failure_reason: None,
            created_at: Utc::now(),
            resolved_at: None,
        })
    }

    /// INITIATED → PENDING once the gateway accepted the push
    pub fn mark_pending(&mut self, accepted: &PushAccepted) -> Result<()> {
        if self.status != IntentStatus::Initiated {
            return Err(BillingError::Other(format!(
                "intent {} cannot move to PENDING from {}",
                self.id, self.status
            )));
        }

        self.merchant_request_id = Some(accepted.merchant_request_id.clone());
        self.checkout_request_id = Some(accepted.checkout_request_id.clone());
        self.status = IntentStatus::Pending;
        Ok(())
    }

    /// PENDING → COMPLETED / FAILED
    ///
    /// Terminal intents return `DuplicateReconciliation` and are left as-is.
    pub fn resolve(&mut self, resolution: &Resolution, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            IntentStatus::Pending => {}
            IntentStatus::Completed | IntentStatus::Failed => {
                return Err(BillingError::DuplicateReconciliation {
                    checkout_request_id: self.checkout_key().to_string(),
                    status: self.status,
                });
            }
            IntentStatus::Initiated => {
                return Err(BillingError::Other(format!(
                    "intent {} was never accepted by the gateway",
                    self.id
                )));
            }
        }

        match resolution {
            Resolution::Completed {
                receipt_number,
                transaction_time,
                ..
            } => {
                self.gateway_receipt_number = receipt_number.clone();
                self.gateway_transaction_time = *transaction_time;
            }
            Resolution::Failed { result_code, reason } => {
                self.failure_code = Some(*result_code);
                self.failure_reason = Some(reason.clone());
            }
        }

        self.status = resolution.status();
        self.resolved_at = Some(now);
        Ok(())
    }

    /// Fill a receipt or transaction time a COMPLETED intent is still missing
    ///
    /// Only absent fields are written; status and timestamps never change.
    /// Returns whether anything was filled.
    pub fn fill_missing_details(&mut self, resolution: &Resolution) -> bool {
        let Resolution::Completed {
            receipt_number,
            transaction_time,
            ..
        } = resolution
        else {
            return false;
        };
        if self.status != IntentStatus::Completed {
            return false;
        }

        let mut filled = false;
        if self.gateway_receipt_number.is_none() && receipt_number.is_some() {
            self.gateway_receipt_number = receipt_number.clone();
            filled = true;
        }
        if self.gateway_transaction_time.is_none() && transaction_time.is_some() {
            self.gateway_transaction_time = *transaction_time;
            filled = true;
        }
        filled
    }

    pub fn checkout_key(&self) -> &str {
        self.checkout_request_id.as_deref().unwrap_or_default()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a successful resolution should extend the subscription
    pub fn extends_subscription(&self) -> bool {
        self.purpose == PaymentPurpose::Subscription
    }
}
