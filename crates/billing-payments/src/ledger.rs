//! Subscription Ledger
//!
//! Read side of the subscription accounts plus the lapse sweep. Period
//! extensions are only ever applied by reconciliation, inside the store's
//! resolve transaction.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use billing_core::{
    error::{BillingError, Result},
    subscription::{Serviceability, SubscriptionAccount, SubscriptionStatus},
};

use crate::store::BillingStore;

/// Ledger service
pub struct SubscriptionLedger<S: BillingStore> {
    store: Arc<S>,
}

impl<S: BillingStore + 'static> SubscriptionLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create the account for a newly onboarded business
    pub fn open_account(
        &self,
        business_id: &str,
        status: SubscriptionStatus,
        period_ends_at: DateTime<Utc>,
    ) -> Result<SubscriptionAccount> {
        if self.store.get_account(business_id)?.is_some() {
            return Err(BillingError::Other(format!(
                "business {business_id} already has a subscription account"
            )));
        }

        let account = SubscriptionAccount::open(business_id, status, period_ends_at);
        self.store.save_account(&account)?;

        tracing::info!(
            business_id = %business_id,
            status = %account.status,
            period_ends_at = %account.period_ends_at,
            "Opened subscription account"
        );

        Ok(account)
    }

    pub fn account(&self, business_id: &str) -> Result<SubscriptionAccount> {
        self.store
            .get_account(business_id)?
            .ok_or_else(|| BillingError::AccountNotFound(business_id.to_string()))
    }

    /// Current entitlement, derived from the period end even between sweeps
    pub fn serviceability(&self, business_id: &str) -> Result<Serviceability> {
        Ok(self.account(business_id)?.serviceability(Utc::now()))
    }

    /// Suspend every account whose period ended
    pub fn sweep_lapsed(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let suspended = self.store.suspend_lapsed(now)?;
        for business_id in &suspended {
            tracing::warn!(business_id = %business_id, "Subscription lapsed; account suspended");
        }
        Ok(suspended)
    }

    /// Run the sweep on a fixed interval until the task is aborted
    pub fn spawn_lapse_sweep(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match self.sweep_lapsed(Utc::now()) {
                    Ok(suspended) if !suspended.is_empty() => {
                        tracing::info!(count = suspended.len(), "Lapse sweep finished");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Lapse sweep failed"),
                }
            }
        })
    }
}
