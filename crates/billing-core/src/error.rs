//! Error Types

use thiserror::Error;

use crate::intent::IntentStatus;

/// Result type alias for billing operations
pub type Result<T> = std::result::Result<T, BillingError>;

/// Billing error types
#[derive(Error, Debug)]
pub enum BillingError {
    /// OAuth token could not be obtained from the gateway
    #[error("Credential error: {0}")]
    Credential(String),

    /// Gateway rejected the request synchronously
    #[error("Gateway rejected request (status {status:?}): {payload}")]
    GatewayRejection { status: Option<u16>, payload: String },

    /// Gateway answered with something we could not parse
    #[error("Malformed gateway response: {payload}")]
    MalformedResponse { payload: String },

    /// Transport failure talking to the gateway
    #[error("Network error: {0}")]
    Network(String),

    /// Callback or poll referenced a checkout / intent we never created
    #[error("Unknown payment intent: {0}")]
    UnknownIntent(String),

    /// Intent already reached a terminal state
    #[error("Intent {checkout_request_id} already {status}")]
    DuplicateReconciliation {
        checkout_request_id: String,
        status: IntentStatus,
    },

    /// A second intent was inserted for an existing checkout id
    #[error("Checkout request already recorded: {0}")]
    DuplicateCheckout(String),

    /// Store failure while reading or applying a transition
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Phone number could not be normalized
    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),

    /// Amount is zero or otherwise unusable
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// No subscription account for the business
    #[error("Subscription account not found: {0}")]
    AccountNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl BillingError {
    /// Check if the caller may retry the operation with a fresh attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::Credential(_)
                | BillingError::Network(_)
                | BillingError::Persistence(_)
        )
    }

    /// Whether the failure came from the gateway side of the wire
    pub fn is_gateway_failure(&self) -> bool {
        matches!(
            self,
            BillingError::Credential(_)
                | BillingError::GatewayRejection { .. }
                | BillingError::MalformedResponse { .. }
                | BillingError::Network(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            BillingError::Credential(_) | BillingError::Network(_) => {
                "The payment service is unavailable right now. Please try again.".into()
            }
            BillingError::GatewayRejection { .. } | BillingError::MalformedResponse { .. } => {
                "The payment request was not accepted. Please try again.".into()
            }
            BillingError::InvalidPhone(phone) => {
                format!("'{}' is not a valid phone number.", phone)
            }
            BillingError::InvalidAmount(msg) => format!("Invalid amount: {}", msg),
            BillingError::UnknownIntent(_) => "Payment not found.".into(),
            BillingError::AccountNotFound(_) => "No subscription found for this business.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for BillingError {
    fn from(err: anyhow::Error) -> Self {
        BillingError::Other(err.to_string())
    }
}
