//! Daraja Gateway
//!
//! Implementation of `PaymentGateway` for M-Pesa STK push (Lipa na M-Pesa
//! Online) through the Safaricom Daraja API.

use std::str::FromStr;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use billing_core::{
    error::{BillingError, Result},
    gateway::{
        gateway_timestamp, lenient_i64, CallbackMetadata, GatewayResult, PaymentGateway,
        PushAccepted, PushRequest, StatusQuery,
    },
};

const TOKEN_PATH: &str = "/oauth/v1/generate";
const PUSH_PATH: &str = "/mpesa/stkpush/v1/processrequest";
const QUERY_PATH: &str = "/mpesa/stkpushquery/v1/query";

/// Error code Daraja returns while the payer has not answered yet
const STILL_PROCESSING_ERROR: &str = "500.001.1001";

/// Result code some query responses use for "still under processing"
const STILL_PROCESSING_RESULT: i64 = 4999;

const MAX_REFERENCE_LEN: usize = 12;
const MAX_DESCRIPTION_LEN: usize = 13;

/// Daraja deployment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DarajaEnvironment {
    Sandbox,
    Production,
}

impl DarajaEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            DarajaEnvironment::Sandbox => "https://sandbox.safaricom.co.ke",
            DarajaEnvironment::Production => "https://api.safaricom.co.ke",
        }
    }
}

impl FromStr for DarajaEnvironment {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sandbox" | "test" => Ok(DarajaEnvironment::Sandbox),
            "production" | "live" => Ok(DarajaEnvironment::Production),
            other => Err(BillingError::Config(format!(
                "MPESA_ENVIRONMENT must be sandbox or production, got '{other}'"
            ))),
        }
    }
}

/// Daraja client configuration
#[derive(Clone, Debug)]
pub struct DarajaConfig {
    /// API base URL (overridable for tests and proxies)
    pub base_url: String,

    pub consumer_key: String,
    pub consumer_secret: String,

    /// Paybill / till number receiving the money
    pub shortcode: String,

    /// Lipa na M-Pesa Online passkey
    pub passkey: String,

    /// Public URL of our webhook
    pub callback_url: String,

    /// `CustomerPayBillOnline` or `CustomerBuyGoodsOnline`
    pub transaction_type: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl DarajaConfig {
    pub fn new(
        environment: DarajaEnvironment,
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        shortcode: impl Into<String>,
        passkey: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            base_url: environment.base_url().into(),
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            shortcode: shortcode.into(),
            passkey: passkey.into(),
            callback_url: callback_url.into(),
            transaction_type: "CustomerPayBillOnline".into(),
            timeout_secs: 30,
        }
    }

    /// Point the client at a different host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn from_env() -> Result<Self> {
        let required = |key: &str| {
            std::env::var(key).map_err(|_| BillingError::Config(format!("{key} not set")))
        };

        let environment: DarajaEnvironment = std::env::var("MPESA_ENVIRONMENT")
            .unwrap_or_else(|_| "sandbox".into())
            .parse()?;

        let mut config = Self::new(
            environment,
            required("MPESA_CONSUMER_KEY")?,
            required("MPESA_CONSUMER_SECRET")?,
            required("MPESA_SHORTCODE")?,
            required("MPESA_PASSKEY")?,
            required("MPESA_CALLBACK_URL")?,
        );

        if let Ok(base_url) = std::env::var("MPESA_BASE_URL") {
            config = config.with_base_url(base_url);
        }
        if let Ok(transaction_type) = std::env::var("MPESA_TRANSACTION_TYPE") {
            config.transaction_type = transaction_type;
        }
        if let Some(timeout) = std::env::var("MPESA_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
        {
            config.timeout_secs = timeout;
        }

        Ok(config)
    }

    /// `base64(shortcode + passkey + timestamp)`
    fn password(&self, timestamp: &str) -> String {
        STANDARD.encode(format!("{}{}{}", self.shortcode, self.passkey, timestamp))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushBody<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'a str,
    amount: u64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    call_back_url: &'a str,
    account_reference: String,
    transaction_desc: String,
}

#[derive(Debug, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    response_code: Value,
    #[serde(rename = "CustomerMessage", default)]
    customer_message: Option<String>,
}

#[derive(Debug, Serialize)]
struct StkQueryBody<'a> {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: &'a str,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct StkQueryResponse {
    #[serde(rename = "MerchantRequestID", default)]
    merchant_request_id: Option<String>,
    #[serde(rename = "ResultCode", default)]
    result_code: Value,
    #[serde(rename = "ResultDesc", default)]
    result_desc: Option<String>,

    /// Some gateway builds echo the callback items on a completed query
    #[serde(rename = "CallbackMetadata", default)]
    callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
struct DarajaErrorBody {
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
}

/// Daraja STK-push gateway
pub struct DarajaGateway {
    client: reqwest::Client,
    config: DarajaConfig,
}

impl DarajaGateway {
    pub fn new(config: DarajaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BillingError::Config(format!("http client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(DarajaConfig::from_env()?)
    }

    pub fn config(&self) -> &DarajaConfig {
        &self.config
    }
}

fn network(e: reqwest::Error) -> BillingError {
    BillingError::Network(e.to_string())
}

fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

#[async_trait]
impl PaymentGateway for DarajaGateway {
    async fn acquire_token(&self) -> Result<String> {
        let resp = self
            .client
            .get(self.config.url(TOKEN_PATH))
            .query(&[("grant_type", "client_credentials")])
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| BillingError::Credential(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| BillingError::Credential(e.to_string()))?;

        if !status.is_success() {
            return Err(BillingError::Credential(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| BillingError::Credential(format!("{e}; body={body}")))?;

        if token.access_token.is_empty() {
            return Err(BillingError::Credential("empty access token".into()));
        }

        Ok(token.access_token)
    }

    async fn push(&self, request: &PushRequest) -> Result<PushAccepted> {
        let token = self.acquire_token().await?;
        let timestamp = gateway_timestamp(Utc::now());
        let phone = request.phone.as_str();

        let body = StkPushBody {
            business_short_code: &self.config.shortcode,
            password: self.config.password(&timestamp),
            timestamp,
            transaction_type: &self.config.transaction_type,
            amount: request.amount,
            party_a: phone,
            party_b: &self.config.shortcode,
            phone_number: phone,
            call_back_url: &self.config.callback_url,
            account_reference: truncate(&request.reference, MAX_REFERENCE_LEN),
            transaction_desc: truncate(&request.description, MAX_DESCRIPTION_LEN),
        };

        tracing::debug!(
            phone = %request.phone.masked(),
            amount = request.amount,
            reference = %body.account_reference,
            "Sending STK push"
        );

        let resp = self
            .client
            .post(self.config.url(PUSH_PATH))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(network)?;

        let status = resp.status();
        let payload = resp.text().await.map_err(network)?;

        if !status.is_success() {
            return Err(BillingError::GatewayRejection {
                status: Some(status.as_u16()),
                payload,
            });
        }

        let parsed: StkPushResponse = serde_json::from_str(&payload)
            .map_err(|_| BillingError::MalformedResponse { payload: payload.clone() })?;

        if lenient_i64(&parsed.response_code) != Some(0) {
            return Err(BillingError::GatewayRejection {
                status: Some(status.as_u16()),
                payload,
            });
        }

        Ok(PushAccepted {
            merchant_request_id: parsed.merchant_request_id,
            checkout_request_id: parsed.checkout_request_id,
            customer_message: parsed.customer_message,
        })
    }

    async fn query_status(&self, checkout_request_id: &str) -> Result<StatusQuery> {
        let token = self.acquire_token().await?;
        let timestamp = gateway_timestamp(Utc::now());

        let body = StkQueryBody {
            business_short_code: &self.config.shortcode,
            password: self.config.password(&timestamp),
            timestamp,
            checkout_request_id,
        };

        let resp = self
            .client
            .post(self.config.url(QUERY_PATH))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(network)?;

        let status = resp.status();
        let payload = resp.text().await.map_err(network)?;

        if !status.is_success() {
            let still_processing = serde_json::from_str::<DarajaErrorBody>(&payload)
                .ok()
                .and_then(|e| e.error_code)
                .is_some_and(|code| code == STILL_PROCESSING_ERROR);

            if still_processing {
                return Ok(StatusQuery::Processing);
            }

            return Err(BillingError::GatewayRejection {
                status: Some(status.as_u16()),
                payload,
            });
        }

        let parsed: StkQueryResponse = serde_json::from_str(&payload)
            .map_err(|_| BillingError::MalformedResponse { payload: payload.clone() })?;

        match lenient_i64(&parsed.result_code) {
            None | Some(STILL_PROCESSING_RESULT) => Ok(StatusQuery::Processing),
            Some(result_code) => Ok(StatusQuery::Resolved(GatewayResult {
                merchant_request_id: parsed.merchant_request_id,
                checkout_request_id: checkout_request_id.to_string(),
                result_code,
                result_desc: parsed.result_desc.unwrap_or_default(),
                metadata: parsed
                    .callback_metadata
                    .map(|m| m.to_metadata())
                    .unwrap_or_default(),
            })),
        }
    }

    fn name(&self) -> &str {
        "Daraja"
    }
}
