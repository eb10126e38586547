//! Payer phone numbers
//!
//! The gateway only accepts MSISDNs in `<country><subscriber>` form with no
//! `+`. The same normalized value is stored on the intent and shown back to
//! support staff, so a payment can always be matched to a phone.

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};

/// Default country calling code
pub const DEFAULT_COUNTRY_CODE: &str = "254";

/// Subscriber digits after the country code
const SUBSCRIBER_DIGITS: usize = 9;

/// A normalized payer phone number (e.g. `254712345678`)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Normalize using the default country code
    pub fn parse(raw: &str) -> Result<Self> {
        Self::parse_with_country(raw, DEFAULT_COUNTRY_CODE)
    }

    /// Strip `+`, separators and a trunk `0`, then enforce the country prefix
    pub fn parse_with_country(raw: &str, country_code: &str) -> Result<Self> {
        let mut digits: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
            .collect();

        if let Some(rest) = digits.strip_prefix('+') {
            digits = rest.to_string();
        }
        if !digits.is_empty() && !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(BillingError::InvalidPhone(raw.to_string()));
        }

        let subscriber = if let Some(rest) = digits.strip_prefix(country_code) {
            rest
        } else if let Some(rest) = digits.strip_prefix('0') {
            rest
        } else {
            digits.as_str()
        };

        if subscriber.len() != SUBSCRIBER_DIGITS || subscriber.starts_with('0') {
            return Err(BillingError::InvalidPhone(raw.to_string()));
        }

        Ok(Self(format!("{country_code}{subscriber}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Masked form for logs, e.g. `2547****5678`
    pub fn masked(&self) -> String {
        let len = self.0.len();
        if len <= 8 {
            return self.0.clone();
        }
        format!("{}****{}", &self.0[..4], &self.0[len - 4..])
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = BillingError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PhoneNumber> for String {
    fn from(value: PhoneNumber) -> Self {
        value.0
    }
}
