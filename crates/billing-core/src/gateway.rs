//! Payment Gateway Strategy Pattern
//!
//! Common interface for mobile-money gateways. The Daraja client in
//! `billing-gateway` is the production implementation; tests use the
//! scriptable mock from the same crate.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use billing_core::{PaymentGateway, PushRequest};
//!
//! let accepted = gateway.push(&PushRequest { .. }).await?;
//! let status = gateway.query_status(&accepted.checkout_request_id).await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::intent::Resolution;
use crate::phone::PhoneNumber;

/// Offset of the gateway's local clock (East Africa Time)
pub const GATEWAY_UTC_OFFSET_SECS: i32 = 3 * 3600;

/// Result code the gateway uses for a successful payment
pub const RESULT_SUCCESS: i64 = 0;

/// Outbound push-payment request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushRequest {
    pub phone: PhoneNumber,

    /// Whole currency units
    pub amount: u64,

    /// Account reference shown on the payer's handset
    pub reference: String,

    pub description: String,
}

/// Gateway acknowledgement of an accepted push
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAccepted {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub customer_message: Option<String>,
}

/// Optional key/value items attached to a successful result
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    pub amount: Option<u64>,
    pub receipt_number: Option<String>,
    pub transaction_time: Option<DateTime<Utc>>,
    pub phone: Option<String>,
}

/// `CallbackMetadata` block shared by the result callback and the status query
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub item: Vec<MetadataItem>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

impl CallbackMetadata {
    fn value(&self, name: &str) -> Option<&serde_json::Value> {
        self.item
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.value.as_ref())
    }

    /// Items may be missing or reordered
    pub fn to_metadata(&self) -> PaymentMetadata {
        PaymentMetadata {
            amount: self
                .value("Amount")
                .and_then(lenient_i64)
                .and_then(|amount| u64::try_from(amount).ok()),
            receipt_number: self.value("MpesaReceiptNumber").and_then(lenient_string),
            transaction_time: self
                .value("TransactionDate")
                .and_then(lenient_string)
                .and_then(|raw| parse_transaction_time(&raw)),
            phone: self.value("PhoneNumber").and_then(lenient_string),
        }
    }
}

/// A terminal result for one checkout request, from callback or status query
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResult {
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: String,
    pub result_code: i64,
    pub result_desc: String,
    #[serde(default)]
    pub metadata: PaymentMetadata,
}

impl GatewayResult {
    pub fn is_success(&self) -> bool {
        self.result_code == RESULT_SUCCESS
    }

    /// Map onto the intent state machine
    pub fn resolution(&self) -> Resolution {
        if self.is_success() {
            Resolution::Completed {
                receipt_number: self.metadata.receipt_number.clone(),
                transaction_time: self.metadata.transaction_time,
                amount: self.metadata.amount,
            }
        } else {
            let reason = if self.result_desc.trim().is_empty() {
                result_code_reason(self.result_code).to_string()
            } else {
                self.result_desc.clone()
            };
            Resolution::Failed {
                result_code: self.result_code,
                reason,
            }
        }
    }
}

/// Outcome of a synchronous status query
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusQuery {
    /// The gateway has a terminal result
    Resolved(GatewayResult),
    /// Still being processed on the payer's handset
    Processing,
}

/// Gateway trait (Strategy pattern)
///
/// Implementations hold no mutable state: every call acquires its own token.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Exchange static credentials for a short-lived bearer token
    async fn acquire_token(&self) -> Result<String>;

    /// Submit a push payment to the payer's handset
    async fn push(&self, request: &PushRequest) -> Result<PushAccepted>;

    /// Ask the gateway whether a checkout request has resolved
    async fn query_status(&self, checkout_request_id: &str) -> Result<StatusQuery>;

    /// Gateway name for logs
    fn name(&self) -> &str;
}

/// Human-readable reason for common result codes
pub fn result_code_reason(code: i64) -> &'static str {
    match code {
        0 => "The service request is processed successfully.",
        1 => "The balance is insufficient for the transaction.",
        1001 => "Unable to lock subscriber, a transaction is already in process.",
        1019 => "Transaction has expired.",
        1032 => "Request cancelled by user.",
        1037 => "The payer could not be reached.",
        2001 => "The initiator information is invalid.",
        _ => "The payment could not be completed.",
    }
}

/// Read an integer the gateway may send as a number or a numeric string
pub fn lenient_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a value the gateway may send as a string or a bare number
pub fn lenient_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a gateway `yyyyMMddHHmmss` local timestamp
pub fn parse_transaction_time(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%Y%m%d%H%M%S").ok()?;
    let offset = FixedOffset::east_opt(GATEWAY_UTC_OFFSET_SECS)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Format `now` as a gateway `yyyyMMddHHmmss` local timestamp
pub fn gateway_timestamp(now: DateTime<Utc>) -> String {
    let offset = FixedOffset::east_opt(GATEWAY_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix());
    now.with_timezone(&offset).format("%Y%m%d%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_transaction_time_is_eat() {
        let parsed = parse_transaction_time("20191219102115").unwrap();
        assert_eq!(parsed.hour(), 7);
        assert_eq!(parsed.minute(), 21);
        assert!(parse_transaction_time("not-a-date").is_none());
    }

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now().with_nanosecond(0).unwrap();
        let stamp = gateway_timestamp(now);
        assert_eq!(stamp.len(), 14);
        assert_eq!(parse_transaction_time(&stamp), Some(now));
    }

    #[test]
    fn test_lenient_values() {
        assert_eq!(lenient_i64(&serde_json::json!("1032")), Some(1032));
        assert_eq!(lenient_i64(&serde_json::json!(2000.0)), Some(2000));
        assert_eq!(lenient_i64(&serde_json::json!(1.5)), None);
        assert_eq!(
            lenient_string(&serde_json::json!(254712345678_u64)).as_deref(),
            Some("254712345678")
        );
        assert_eq!(lenient_string(&serde_json::json!(null)), None);
    }

    #[test]
    fn test_metadata_items_by_name() {
        let metadata: CallbackMetadata = serde_json::from_value(serde_json::json!({
            "Item": [
                { "Name": "TransactionDate", "Value": 20191219102115_u64 },
                { "Name": "Balance" },
                { "Name": "MpesaReceiptNumber", "Value": "ABC123XYZ" },
                { "Name": "Amount", "Value": 2000.0 }
            ]
        }))
        .unwrap();

        let parsed = metadata.to_metadata();
        assert_eq!(parsed.amount, Some(2000));
        assert_eq!(parsed.receipt_number.as_deref(), Some("ABC123XYZ"));
        assert_eq!(parsed.transaction_time, parse_transaction_time("20191219102115"));
        assert!(parsed.phone.is_none());
    }

    #[test]
    fn test_failed_resolution_falls_back_to_catalogue() {
        let result = GatewayResult {
            merchant_request_id: None,
            checkout_request_id: "ws_CO_1".into(),
            result_code: 1032,
            result_desc: String::new(),
            metadata: PaymentMetadata::default(),
        };
        assert_eq!(
            result.resolution(),
            Resolution::Failed { result_code: 1032, reason: "Request cancelled by user.".into() }
        );
    }
}
