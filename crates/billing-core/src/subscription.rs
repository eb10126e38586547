//! Subscription Ledger
//!
//! Per-business billing period state. Only a completed subscription payment
//! moves `period_ends_at`, and only forward.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::intent::IntentId;

/// Days added per completed subscription payment
pub const EXTENSION_DAYS: i64 = 30;

/// Account lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    PendingApproval,
    Trial,
    Active,
    Suspended,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::PendingApproval => "PENDING_APPROVAL",
            SubscriptionStatus::Trial => "TRIAL",
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Suspended => "SUSPENDED",
        }
    }

    /// States that grant service while the period is running
    fn grants_service(&self) -> bool {
        matches!(self, SubscriptionStatus::Trial | SubscriptionStatus::Active)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record of one applied extension
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodExtension {
    pub intent_id: IntentId,
    pub previous_end: DateTime<Utc>,
    pub new_end: DateTime<Utc>,
    pub applied_at: DateTime<Utc>,
}

/// A business's subscription account
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionAccount {
    pub business_id: String,
    pub status: SubscriptionStatus,
    pub period_ends_at: DateTime<Utc>,
    pub is_serviceable: bool,
    #[serde(default)]
    pub extensions: Vec<PeriodExtension>,
}

impl SubscriptionAccount {
    /// Open an account in the given state (onboarding happens elsewhere)
    pub fn open(
        business_id: impl Into<String>,
        status: SubscriptionStatus,
        period_ends_at: DateTime<Utc>,
    ) -> Self {
        let mut account = Self {
            business_id: business_id.into(),
            status,
            period_ends_at,
            is_serviceable: false,
            extensions: Vec::new(),
        };
        account.is_serviceable = account.derived_serviceable(Utc::now());
        account
    }

    /// Start a trial of `days` from now
    pub fn trial(business_id: impl Into<String>, days: i64) -> Self {
        Self::open(business_id, SubscriptionStatus::Trial, Utc::now() + Duration::days(days))
    }

    /// Extend by [`EXTENSION_DAYS`] from the later of now / current end
    ///
    /// Callers guarantee this runs once per completed intent.
    pub fn extend(&mut self, intent_id: &IntentId, now: DateTime<Utc>) -> PeriodExtension {
        let previous_end = self.period_ends_at;
        let anchor = previous_end.max(now);
        let new_end = anchor + Duration::days(EXTENSION_DAYS);

        self.period_ends_at = new_end;
        self.status = SubscriptionStatus::Active;
        self.is_serviceable = true;

        let extension = PeriodExtension {
            intent_id: intent_id.clone(),
            previous_end,
            new_end,
            applied_at: now,
        };
        self.extensions.push(extension.clone());
        extension
    }

    /// Whether this intent already extended the account
    pub fn was_extended_by(&self, intent_id: &IntentId) -> bool {
        self.extensions.iter().any(|e| &e.intent_id == intent_id)
    }

    /// Serviceability as of `now`, independent of the cached flag
    pub fn derived_serviceable(&self, now: DateTime<Utc>) -> bool {
        self.status.grants_service() && self.period_ends_at > now
    }

    /// Whether the period ran out while the account still claims service
    pub fn has_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status.grants_service() && self.period_ends_at <= now
    }

    /// Move a lapsed account to SUSPENDED. Returns true if it changed.
    pub fn suspend_if_lapsed(&mut self, now: DateTime<Utc>) -> bool {
        if !self.has_lapsed(now) {
            return false;
        }
        self.status = SubscriptionStatus::Suspended;
        self.is_serviceable = false;
        true
    }

    /// View for feature gating and UI banners
    pub fn serviceability(&self, now: DateTime<Utc>) -> Serviceability {
        let status = if self.has_lapsed(now) {
            SubscriptionStatus::Suspended
        } else {
            self.status
        };

        Serviceability {
            business_id: self.business_id.clone(),
            status,
            period_ends_at: self.period_ends_at,
            is_serviceable: self.derived_serviceable(now),
        }
    }
}

/// Read model exposed to the rest of the application
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Serviceability {
    pub business_id: String,
    pub status: SubscriptionStatus,
    pub period_ends_at: DateTime<Utc>,
    pub is_serviceable: bool,
}
