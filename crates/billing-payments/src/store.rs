//! Payment Intent Store
//!
//! Durable record of every payment attempt plus the subscription accounts the
//! attempts extend. Resolution is a conditional transition serialized per
//! intent: the intent's own lock is held while its current status is checked,
//! the ledger is extended and the terminal state is written.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use billing_core::{
    error::{BillingError, Result},
    intent::{IntentId, IntentStatus, PaymentIntent, Resolution},
    subscription::{PeriodExtension, SubscriptionAccount},
};

/// Result of applying a gateway resolution to the store
#[derive(Clone, Debug)]
pub enum ResolveOutcome {
    /// This call performed the terminal transition
    Applied {
        intent: PaymentIntent,
        extension: Option<PeriodExtension>,
        /// Subscription payment completed but the business has no account
        ledger_missing: bool,
    },
    /// Intent was already terminal; no transition and no extension
    AlreadyTerminal {
        intent: PaymentIntent,
        /// A missing receipt or transaction time was filled from this delivery
        enriched: bool,
    },
    /// No intent for this checkout request id
    Unknown,
}

/// Storage trait for intents and subscription accounts
pub trait BillingStore: Send + Sync {
    /// Persist a PENDING intent; checkout request ids are unique
    fn insert_intent(&self, intent: &PaymentIntent) -> Result<()>;

    /// Get intent by local id
    fn get_intent(&self, id: &IntentId) -> Result<Option<PaymentIntent>>;

    /// Get intent by gateway checkout request id
    fn get_by_checkout(&self, checkout_request_id: &str) -> Result<Option<PaymentIntent>>;

    /// All intents of a business, newest first
    fn list_for_business(&self, business_id: &str) -> Result<Vec<PaymentIntent>>;

    /// Apply a terminal resolution exactly once (check + transition + extend)
    fn resolve(
        &self,
        checkout_request_id: &str,
        resolution: &Resolution,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome>;

    /// Create or overwrite an account (onboarding)
    fn save_account(&self, account: &SubscriptionAccount) -> Result<()>;

    /// Get account by business id
    fn get_account(&self, business_id: &str) -> Result<Option<SubscriptionAccount>>;

    /// Suspend every account whose period ran out; returns their business ids
    fn suspend_lapsed(&self, now: DateTime<Utc>) -> Result<Vec<String>>;
}

type Slot<T> = Arc<Mutex<T>>;

fn poisoned<T>(_: PoisonError<T>) -> BillingError {
    BillingError::Persistence("store lock poisoned".into())
}

/// In-memory store (for development and tests)
pub struct MemoryBillingStore {
    intents: RwLock<HashMap<IntentId, Slot<PaymentIntent>>>,
    by_checkout: RwLock<HashMap<String, IntentId>>,
    accounts: RwLock<HashMap<String, Slot<SubscriptionAccount>>>,
}

impl Default for MemoryBillingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBillingStore {
    pub fn new() -> Self {
        Self {
            intents: RwLock::new(HashMap::new()),
            by_checkout: RwLock::new(HashMap::new()),
            accounts: RwLock::new(HashMap::new()),
        }
    }

    fn intent_slot(&self, id: &IntentId) -> Result<Option<Slot<PaymentIntent>>> {
        let intents = self.intents.read().map_err(poisoned)?;
        Ok(intents.get(id).cloned())
    }

    fn intent_slot_by_checkout(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Slot<PaymentIntent>>> {
        let id = {
            let by_checkout = self.by_checkout.read().map_err(poisoned)?;
            by_checkout.get(checkout_request_id).cloned()
        };

        match id {
            Some(id) => self.intent_slot(&id),
            None => Ok(None),
        }
    }

    fn account_slot(&self, business_id: &str) -> Result<Option<Slot<SubscriptionAccount>>> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        Ok(accounts.get(business_id).cloned())
    }
}

impl BillingStore for MemoryBillingStore {
    fn insert_intent(&self, intent: &PaymentIntent) -> Result<()> {
        if intent.status != IntentStatus::Pending {
            return Err(BillingError::Persistence(format!(
                "only PENDING intents are stored, got {}",
                intent.status
            )));
        }
        let checkout = intent
            .checkout_request_id
            .clone()
            .ok_or_else(|| BillingError::Persistence("intent has no checkout request id".into()))?;

        let mut by_checkout = self.by_checkout.write().map_err(poisoned)?;
        if by_checkout.contains_key(&checkout) {
            return Err(BillingError::DuplicateCheckout(checkout));
        }

        let mut intents = self.intents.write().map_err(poisoned)?;
        intents.insert(intent.id.clone(), Arc::new(Mutex::new(intent.clone())));
        by_checkout.insert(checkout, intent.id.clone());

        Ok(())
    }

    fn get_intent(&self, id: &IntentId) -> Result<Option<PaymentIntent>> {
        match self.intent_slot(id)? {
            Some(slot) => Ok(Some(slot.lock().map_err(poisoned)?.clone())),
            None => Ok(None),
        }
    }

    fn get_by_checkout(&self, checkout_request_id: &str) -> Result<Option<PaymentIntent>> {
        match self.intent_slot_by_checkout(checkout_request_id)? {
            Some(slot) => Ok(Some(slot.lock().map_err(poisoned)?.clone())),
            None => Ok(None),
        }
    }

    fn list_for_business(&self, business_id: &str) -> Result<Vec<PaymentIntent>> {
        let slots: Vec<Slot<PaymentIntent>> = {
            let intents = self.intents.read().map_err(poisoned)?;
            intents.values().cloned().collect()
        };

        let mut found = Vec::new();
        for slot in slots {
            let intent = slot.lock().map_err(poisoned)?;
            if intent.business_id == business_id {
                found.push(intent.clone());
            }
        }

        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    fn resolve(
        &self,
        checkout_request_id: &str,
        resolution: &Resolution,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome> {
        let Some(slot) = self.intent_slot_by_checkout(checkout_request_id)? else {
            return Ok(ResolveOutcome::Unknown);
        };

        // Held until the terminal write: racing resolvers queue here.
        let mut current = slot.lock().map_err(poisoned)?;
        if current.is_terminal() {
            let enriched = current.fill_missing_details(resolution);
            return Ok(ResolveOutcome::AlreadyTerminal {
                intent: current.clone(),
                enriched,
            });
        }

        let mut resolved = current.clone();
        resolved.resolve(resolution, now)?;

        let mut extension = None;
        let mut ledger_missing = false;
        if resolution.is_success() && resolved.extends_subscription() {
            match self.account_slot(&resolved.business_id)? {
                Some(account) => {
                    let mut account = account.lock().map_err(poisoned)?;
                    extension = Some(account.extend(&resolved.id, now));
                }
                None => ledger_missing = true,
            }
        }

        *current = resolved.clone();

        Ok(ResolveOutcome::Applied {
            intent: resolved,
            extension,
            ledger_missing,
        })
    }

    fn save_account(&self, account: &SubscriptionAccount) -> Result<()> {
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        match accounts.get(&account.business_id) {
            Some(slot) => *slot.lock().map_err(poisoned)? = account.clone(),
            None => {
                accounts.insert(account.business_id.clone(), Arc::new(Mutex::new(account.clone())));
            }
        }
        Ok(())
    }

    fn get_account(&self, business_id: &str) -> Result<Option<SubscriptionAccount>> {
        match self.account_slot(business_id)? {
            Some(slot) => Ok(Some(slot.lock().map_err(poisoned)?.clone())),
            None => Ok(None),
        }
    }

    fn suspend_lapsed(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let slots: Vec<Slot<SubscriptionAccount>> = {
            let accounts = self.accounts.read().map_err(poisoned)?;
            accounts.values().cloned().collect()
        };

        let mut suspended = Vec::new();
        for slot in slots {
            let mut account = slot.lock().map_err(poisoned)?;
            if account.suspend_if_lapsed(now) {
                suspended.push(account.business_id.clone());
            }
        }
        Ok(suspended)
    }
}
